//! Binary class-file reader.
//!
//! Parsing is strictly sequential (constant pool, flags, this/super,
//! interfaces, fields, methods, attributes) and rejects trailing bytes. A
//! second pass then checks every constant pool index against the tag its
//! context requires. No symbolic resolution happens here.

use crate::access_flags::{ClassAccess, FieldAccess, MethodAccess};
use crate::class_file::{
    Attribute, AttributeInfo, CodeAttribute, ExceptionTableEntry, FieldInfo, LineNumber,
    MethodInfo, RawClass, CLASS_MAGIC, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION,
};
use crate::constant_pool::{decode_modified_utf8, tags, ConstantPool, ConstantPoolEntry};
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::reader::ByteReader;
use core_types::{VmError, VmResult};
use std::collections::HashSet;

/// Parses class-file bytes into a [`RawClass`].
///
/// # Examples
///
/// ```
/// use classfile::{ClassBuilder, ClassFileReader};
///
/// let bytes = ClassBuilder::new("Empty", Some("java/lang/Object")).build().unwrap();
/// let class = ClassFileReader::parse(&bytes).unwrap();
/// assert_eq!(class.name().unwrap(), "Empty");
///
/// assert!(ClassFileReader::parse(&bytes[..bytes.len() - 1]).is_err());
/// ```
#[derive(Debug)]
pub struct ClassFileReader<'a> {
    reader: ByteReader<'a>,
    pool: ConstantPool,
}

impl<'a> ClassFileReader<'a> {
    /// Parses and validates a complete class file.
    pub fn parse(bytes: &'a [u8]) -> VmResult<RawClass> {
        let mut parser = ClassFileReader {
            reader: ByteReader::new(bytes),
            pool: ConstantPool::default(),
        };
        let class = parser.parse_class()?;
        validate_references(&class)?;
        log::trace!(
            "parsed class {} (version {}.{}, {} pool entries)",
            class.name().unwrap_or("?"),
            class.major_version,
            class.minor_version,
            class.constant_pool.len()
        );
        Ok(class)
    }

    fn parse_class(&mut self) -> VmResult<RawClass> {
        let magic = self.reader.read_u4()?;
        if magic != CLASS_MAGIC {
            return Err(VmError::ClassFormat(format!("bad magic 0x{:08x}", magic)));
        }
        let minor_version = self.reader.read_u2()?;
        let major_version = self.reader.read_u2()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(VmError::ClassFormat(format!(
                "unsupported class file version {}.{}",
                major_version, minor_version
            )));
        }

        self.pool = self.parse_constant_pool()?;

        let access = ClassAccess::from_bits_retain(self.reader.read_u2()?);
        let this_class = self.reader.read_u2()?;
        let super_class = self.reader.read_u2()?;

        let interface_count = self.reader.read_u2()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(self.reader.read_u2()?);
        }

        let field_count = self.reader.read_u2()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(FieldInfo {
                access: FieldAccess::from_bits_retain(self.reader.read_u2()?),
                name_index: self.reader.read_u2()?,
                descriptor_index: self.reader.read_u2()?,
                attributes: parse_attributes(&mut self.reader, &self.pool)?,
            });
        }

        let method_count = self.reader.read_u2()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(MethodInfo {
                access: MethodAccess::from_bits_retain(self.reader.read_u2()?),
                name_index: self.reader.read_u2()?,
                descriptor_index: self.reader.read_u2()?,
                attributes: parse_attributes(&mut self.reader, &self.pool)?,
            });
        }

        let attributes = parse_attributes(&mut self.reader, &self.pool)?;

        if !self.reader.is_empty() {
            return Err(VmError::ClassFormat(format!(
                "{} trailing bytes after class attributes",
                self.reader.remaining()
            )));
        }

        Ok(RawClass {
            minor_version,
            major_version,
            constant_pool: std::mem::take(&mut self.pool),
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn parse_constant_pool(&mut self) -> VmResult<ConstantPool> {
        let count = self.reader.read_u2()? as usize;
        if count == 0 {
            return Err(VmError::ClassFormat("constant pool count is zero".to_string()));
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(ConstantPoolEntry::Unusable);
        while entries.len() < count {
            let index = entries.len();
            let tag = self.reader.read_u1()?;
            let entry = match tag {
                tags::UTF8 => {
                    let len = self.reader.read_u2()? as usize;
                    ConstantPoolEntry::Utf8(decode_modified_utf8(self.reader.read_bytes(len)?)?)
                }
                tags::INTEGER => ConstantPoolEntry::Integer(self.reader.read_i4()?),
                tags::FLOAT => ConstantPoolEntry::Float(self.reader.read_f4()?),
                tags::LONG => ConstantPoolEntry::Long(self.reader.read_i8()?),
                tags::DOUBLE => ConstantPoolEntry::Double(self.reader.read_f8()?),
                tags::CLASS => ConstantPoolEntry::Class {
                    name_index: self.reader.read_u2()?,
                },
                tags::STRING => ConstantPoolEntry::String {
                    string_index: self.reader.read_u2()?,
                },
                tags::FIELDREF => ConstantPoolEntry::FieldRef {
                    class_index: self.reader.read_u2()?,
                    name_and_type_index: self.reader.read_u2()?,
                },
                tags::METHODREF => ConstantPoolEntry::MethodRef {
                    class_index: self.reader.read_u2()?,
                    name_and_type_index: self.reader.read_u2()?,
                },
                tags::INTERFACE_METHODREF => ConstantPoolEntry::InterfaceMethodRef {
                    class_index: self.reader.read_u2()?,
                    name_and_type_index: self.reader.read_u2()?,
                },
                tags::NAME_AND_TYPE => ConstantPoolEntry::NameAndType {
                    name_index: self.reader.read_u2()?,
                    descriptor_index: self.reader.read_u2()?,
                },
                tags::METHOD_HANDLE => {
                    let reference_kind = self.reader.read_u1()?;
                    if !(1..=9).contains(&reference_kind) {
                        return Err(VmError::ClassFormat(format!(
                            "invalid method handle kind {} at constant pool index {}",
                            reference_kind, index
                        )));
                    }
                    ConstantPoolEntry::MethodHandle {
                        reference_kind,
                        reference_index: self.reader.read_u2()?,
                    }
                }
                tags::METHOD_TYPE => ConstantPoolEntry::MethodType {
                    descriptor_index: self.reader.read_u2()?,
                },
                tags::INVOKE_DYNAMIC => ConstantPoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: self.reader.read_u2()?,
                    name_and_type_index: self.reader.read_u2()?,
                },
                other => {
                    return Err(VmError::ClassFormat(format!(
                        "unrecognised constant pool tag {} at index {}",
                        other, index
                    )))
                }
            };
            let wide = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
            entries.push(entry);
            if wide {
                if entries.len() >= count {
                    return Err(VmError::ClassFormat(format!(
                        "8-byte constant at index {} overruns the constant pool",
                        index
                    )));
                }
                entries.push(ConstantPoolEntry::Unusable);
            }
        }
        Ok(ConstantPool::from_entries(entries))
    }
}

fn parse_attributes(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> VmResult<Vec<AttributeInfo>> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(parse_attribute(reader, pool)?);
    }
    Ok(attributes)
}

fn parse_attribute(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> VmResult<AttributeInfo> {
    let name_index = reader.read_u2()?;
    let length = reader.read_u4()? as usize;
    let name = pool.utf8(name_index)?;
    let mut body = reader.sub_reader(length)?;
    let parsed = match name {
        "Code" => Attribute::Code(parse_code(&mut body, pool)?),
        "ConstantValue" => Attribute::ConstantValue(body.read_u2()?),
        "Exceptions" => {
            let n = body.read_u2()?;
            let mut list = Vec::with_capacity(n as usize);
            for _ in 0..n {
                list.push(body.read_u2()?);
            }
            Attribute::Exceptions(list)
        }
        "SourceFile" => Attribute::SourceFile(body.read_u2()?),
        "LineNumberTable" => {
            let n = body.read_u2()?;
            let mut rows = Vec::with_capacity(n as usize);
            for _ in 0..n {
                rows.push(LineNumber {
                    start_pc: body.read_u2()?,
                    line: body.read_u2()?,
                });
            }
            Attribute::LineNumberTable(rows)
        }
        _ => Attribute::Unknown(body.read_bytes(length)?.to_vec()),
    };
    if !body.is_empty() {
        return Err(VmError::ClassFormat(format!(
            "{} attribute declares {} bytes but uses {}",
            name,
            length,
            length - body.remaining()
        )));
    }
    Ok(AttributeInfo {
        name_index,
        body: parsed,
    })
}

fn parse_code(body: &mut ByteReader<'_>, pool: &ConstantPool) -> VmResult<CodeAttribute> {
    let max_stack = body.read_u2()?;
    let max_locals = body.read_u2()?;
    let code_length = body.read_u4()? as usize;
    if code_length == 0 || code_length > u16::MAX as usize {
        return Err(VmError::ClassFormat(format!(
            "invalid code length {}",
            code_length
        )));
    }
    let code = body.read_bytes(code_length)?.to_vec();
    let table_len = body.read_u2()?;
    let mut exception_table = Vec::with_capacity(table_len as usize);
    for _ in 0..table_len {
        exception_table.push(ExceptionTableEntry {
            start_pc: body.read_u2()?,
            end_pc: body.read_u2()?,
            handler_pc: body.read_u2()?,
            catch_type: body.read_u2()?,
        });
    }
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes: parse_attributes(body, pool)?,
    })
}

fn malformed(msg: String) -> VmError {
    VmError::ClassFormat(msg)
}

fn validate_references(class: &RawClass) -> VmResult<()> {
    let pool = &class.constant_pool;

    for (index, entry) in pool.iter() {
        let context = format!("constant pool entry {}", index);
        match *entry {
            ConstantPoolEntry::Class { name_index } => {
                pool.expect_tag(name_index, tags::UTF8, &context)?;
            }
            ConstantPoolEntry::String { string_index } => {
                pool.expect_tag(string_index, tags::UTF8, &context)?;
            }
            ConstantPoolEntry::FieldRef {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::MethodRef {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                pool.expect_tag(class_index, tags::CLASS, &context)?;
                pool.expect_tag(name_and_type_index, tags::NAME_AND_TYPE, &context)?;
            }
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => {
                pool.expect_tag(name_index, tags::UTF8, &context)?;
                pool.expect_tag(descriptor_index, tags::UTF8, &context)?;
            }
            ConstantPoolEntry::MethodType { descriptor_index } => {
                pool.expect_tag(descriptor_index, tags::UTF8, &context)?;
            }
            ConstantPoolEntry::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let target = pool.get(reference_index)?.tag();
                let ok = match reference_kind {
                    1..=4 => target == tags::FIELDREF,
                    5 | 8 => target == tags::METHODREF,
                    9 => target == tags::INTERFACE_METHODREF,
                    _ => target == tags::METHODREF || target == tags::INTERFACE_METHODREF,
                };
                if !ok {
                    return Err(malformed(format!(
                        "{}: method handle kind {} references tag {}",
                        context, reference_kind, target
                    )));
                }
            }
            ConstantPoolEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => {
                pool.expect_tag(name_and_type_index, tags::NAME_AND_TYPE, &context)?;
            }
            _ => {}
        }
    }

    // Member descriptors must agree with the kind of reference.
    for (index, entry) in pool.iter() {
        match entry {
            ConstantPoolEntry::FieldRef { .. } => {
                FieldType::parse(pool.member_ref(index)?.descriptor)?;
            }
            ConstantPoolEntry::MethodRef { .. } | ConstantPoolEntry::InterfaceMethodRef { .. } => {
                MethodDescriptor::parse(pool.member_ref(index)?.descriptor)?;
            }
            _ => {}
        }
    }

    pool.expect_tag(class.this_class, tags::CLASS, "this_class")?;
    if class.super_class != 0 {
        pool.expect_tag(class.super_class, tags::CLASS, "super_class")?;
    }
    for &i in &class.interfaces {
        pool.expect_tag(i, tags::CLASS, "interfaces")?;
    }

    let mut seen_fields = HashSet::new();
    for field in &class.fields {
        let name = pool.utf8(field.name_index)?;
        let descriptor = pool.utf8(field.descriptor_index)?;
        FieldType::parse(descriptor)?;
        if !seen_fields.insert((name, descriptor)) {
            return Err(malformed(format!("duplicate field {} {}", name, descriptor)));
        }
        validate_attributes(pool, &field.attributes)?;
    }

    let mut seen_methods = HashSet::new();
    for method in &class.methods {
        let name = pool.utf8(method.name_index)?;
        let descriptor = pool.utf8(method.descriptor_index)?;
        MethodDescriptor::parse(descriptor)?;
        if !seen_methods.insert((name, descriptor)) {
            return Err(malformed(format!("duplicate method {}{}", name, descriptor)));
        }
        validate_attributes(pool, &method.attributes)?;
    }

    validate_attributes(pool, &class.attributes)
}

fn validate_attributes(pool: &ConstantPool, attributes: &[AttributeInfo]) -> VmResult<()> {
    for attr in attributes {
        pool.expect_tag(attr.name_index, tags::UTF8, "attribute name")?;
        match &attr.body {
            Attribute::ConstantValue(index) => {
                let entry = pool.get(*index)?;
                let ok = matches!(
                    entry,
                    ConstantPoolEntry::Integer(_)
                        | ConstantPoolEntry::Float(_)
                        | ConstantPoolEntry::Long(_)
                        | ConstantPoolEntry::Double(_)
                        | ConstantPoolEntry::String { .. }
                );
                if !ok {
                    return Err(malformed(format!(
                        "ConstantValue references {} entry {}",
                        entry.tag_name(),
                        index
                    )));
                }
            }
            Attribute::Exceptions(list) => {
                for &i in list {
                    pool.expect_tag(i, tags::CLASS, "Exceptions attribute")?;
                }
            }
            Attribute::SourceFile(index) => {
                pool.expect_tag(*index, tags::UTF8, "SourceFile attribute")?;
            }
            Attribute::Code(code) => {
                for entry in &code.exception_table {
                    if entry.catch_type != 0 {
                        pool.expect_tag(entry.catch_type, tags::CLASS, "exception table")?;
                    }
                }
                validate_attributes(pool, &code.attributes)?;
            }
            Attribute::LineNumberTable(_) | Attribute::Unknown(_) => {}
        }
    }
    Ok(())
}
