//! Natives of the bootstrap classes.

use super::{NativeEnv, NativeRegistry};
use crate::numeric::{format_double, format_float};
use crate::strings::string_hash;
use crate::throw::{ExecResult, Throw};
use class_linker::bootstrap::{CLONEABLE, OBJECT, PRINT_DESCRIPTORS, PRINT_STREAM, STRING, SYSTEM, THROWABLE};
use class_linker::{ComponentType, RuntimeClass};
use core_types::{ExceptionKind, ObjectRef, Value, VmError};
use memory_manager::Allocation;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const TO_STRING: &str = "()Ljava/lang/String;";

pub(super) fn register_all(r: &mut NativeRegistry) {
    r.register(OBJECT, "hashCode", "()I", object_hash_code)
        .register(OBJECT, "getClass", "()Ljava/lang/Class;", object_get_class)
        .register(OBJECT, "toString", TO_STRING, object_to_string)
        .register(OBJECT, "clone", "()Ljava/lang/Object;", object_clone);

    r.register(STRING, "intern", TO_STRING, string_intern)
        .register(STRING, "equals", "(Ljava/lang/Object;)Z", string_equals)
        .register(STRING, "hashCode", "()I", string_hash_code)
        .register(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;", string_concat)
        .register(STRING, "valueOf", "(I)Ljava/lang/String;", string_value_of)
        .register(STRING, "valueOf", "(J)Ljava/lang/String;", string_value_of)
        .register(STRING, "valueOf", "(Ljava/lang/Object;)Ljava/lang/String;", string_value_of);

    r.register(SYSTEM, "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V", system_arraycopy)
        .register(SYSTEM, "identityHashCode", "(Ljava/lang/Object;)I", system_identity_hash_code)
        .register(SYSTEM, "gc", "()V", |env, _| {
            env.gc();
            Ok(None)
        })
        .register(SYSTEM, "nanoTime", "()J", |env, _| Ok(Some(Value::Long(env.nanos()))))
        .register(SYSTEM, "currentTimeMillis", "()J", |_, _| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Ok(Some(Value::Long(millis)))
        });

    r.register(PRINT_STREAM, "println", "()V", |env, args| print(env, args, "()V", true));
    for &descriptor in PRINT_DESCRIPTORS {
        r.register(PRINT_STREAM, "print", descriptor, move |env, args| {
            print(env, args, descriptor, false)
        })
        .register(PRINT_STREAM, "println", descriptor, move |env, args| {
            print(env, args, descriptor, true)
        });
    }

    r.register(THROWABLE, "fillInStackTrace", "()Ljava/lang/Throwable;", |env, args| {
        let this = receiver(args)?;
        env.fill_in_stack_trace(this)?;
        Ok(Some(Value::Reference(this)))
    })
    .register(THROWABLE, "toString", TO_STRING, |env, args| {
        let this = receiver(args)?;
        let text = env.describe(this);
        Ok(Some(Value::Reference(env.new_string(&text)?)))
    })
    .register(THROWABLE, "printStackTrace", "()V", throwable_print_stack_trace);
}

fn receiver(args: &[Value]) -> ExecResult<ObjectRef> {
    match args.first() {
        Some(Value::Reference(r)) => Ok(*r),
        _ => Err(Throw::null_pointer()),
    }
}

fn bad_arguments(native: &str, args: &[Value]) -> Throw {
    let types: Vec<&str> = args.iter().map(Value::type_name).collect();
    Throw::Error(VmError::Verify(format!(
        "native {} called with ({})",
        native,
        types.join(", ")
    )))
}

/// `String.valueOf(Object)`: `"null"` or the result of `toString()`.
fn display_string(env: &mut NativeEnv<'_>, value: Value) -> ExecResult<String> {
    let object = match value {
        Value::Null => return Ok("null".to_string()),
        Value::Reference(r) => r,
        other => return Err(bad_arguments("String.valueOf", &[other])),
    };
    if env.class_of(object)?.name() == STRING {
        return env.read_string(object);
    }
    match env.call_virtual(object, "toString", TO_STRING, &[])? {
        Some(Value::Reference(s)) => env.read_string(s),
        _ => Ok("null".to_string()),
    }
}

// ============================================================================
// java/lang/Object
// ============================================================================

fn object_hash_code(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    Ok(Some(Value::Int(env.identity_hash(this)?)))
}

fn object_get_class(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let class = env.class_of(this)?;
    Ok(Some(Value::Reference(env.mirror(&class)?)))
}

fn object_to_string(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let class = env.class_of(this)?;
    let hash = match env.call_virtual(this, "hashCode", "()I", &[])? {
        Some(Value::Int(h)) => h,
        _ => env.identity_hash(this)?,
    };
    let text = format!("{}@{:x}", class.java_name(), hash as u32);
    Ok(Some(Value::Reference(env.new_string(&text)?)))
}

/// Shallow copy. Instances must implement `Cloneable`; arrays always can
/// be cloned.
fn object_clone(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let class = env.class_of(this)?;
    if !class.is_array() {
        let cloneable = env.bootstrap_class(CLONEABLE)?;
        if !class.is_assignable_to(&cloneable) {
            return Err(env.exception(
                "java/lang/CloneNotSupportedException",
                Some(&class.java_name()),
            ));
        }
    }
    let body = env
        .with_heap(|heap| heap.get(this).map(|o| o.body.clone()))
        .ok_or_else(|| VmError::Internal(format!("clone of dead object {}", this)))?;
    let copy = env.allocate(Allocation::Body { class, body })?;
    Ok(Some(Value::Reference(copy)))
}

// ============================================================================
// java/lang/String
// ============================================================================

fn string_intern(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    Ok(Some(Value::Reference(env.intern(this)?)))
}

fn string_equals(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let equal = match args.get(1) {
        Some(Value::Reference(other)) if *other == this => true,
        Some(Value::Reference(other)) => {
            env.class_of(*other)?.name() == STRING && env.read_chars(this)? == env.read_chars(*other)?
        }
        _ => false,
    };
    Ok(Some(Value::Int(equal as i32)))
}

fn string_hash_code(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    Ok(Some(Value::Int(string_hash(&env.read_chars(this)?))))
}

fn string_concat(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let other = args
        .get(1)
        .and_then(Value::as_object)
        .ok_or_else(Throw::null_pointer)?;
    let tail = env.read_chars(other)?;
    if tail.is_empty() {
        return Ok(Some(Value::Reference(this)));
    }
    let mut chars = env.read_chars(this)?;
    chars.extend(tail);
    Ok(Some(Value::Reference(env.new_string_from_chars(chars)?)))
}

fn string_value_of(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let text = match args.first() {
        Some(Value::Int(v)) => v.to_string(),
        Some(Value::Long(v)) => v.to_string(),
        Some(v) => display_string(env, *v)?,
        None => return Err(bad_arguments("String.valueOf", args)),
    };
    Ok(Some(Value::Reference(env.new_string(&text)?)))
}

// ============================================================================
// java/lang/System
// ============================================================================

fn system_identity_hash_code(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let hash = match args.first() {
        Some(Value::Reference(r)) => env.identity_hash(*r)?,
        _ => 0,
    };
    Ok(Some(Value::Int(hash)))
}

fn array_store(message: String) -> Throw {
    Throw::raise(ExceptionKind::ArrayStore, message)
}

fn out_of_bounds(message: String) -> Throw {
    Throw::raise(ExceptionKind::ArrayIndexOutOfBounds, message)
}

fn system_arraycopy(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let (src, src_pos, dst, dst_pos, length) = match args {
        [src, Value::Int(sp), dst, Value::Int(dp), Value::Int(len)] => (*src, *sp, *dst, *dp, *len),
        _ => return Err(bad_arguments("System.arraycopy", args)),
    };
    let src = src.as_object().ok_or_else(Throw::null_pointer)?;
    let dst = dst.as_object().ok_or_else(Throw::null_pointer)?;
    let src_class = env.class_of(src)?;
    let dst_class = env.class_of(dst)?;
    let element_check = copy_check(&src_class, &dst_class)?;

    let (src_len, dst_len) = env.with_heap(|heap| -> Result<_, VmError> {
        Ok((heap.array_length(src)?, heap.array_length(dst)?))
    })?;
    if length < 0 {
        return Err(out_of_bounds(format!("arraycopy: length {} is negative", length)));
    }
    if src_pos < 0 || src_pos as usize + length as usize > src_len {
        return Err(out_of_bounds(format!(
            "arraycopy: last source index {} out of bounds for length {}",
            src_pos as i64 + length as i64,
            src_len
        )));
    }
    if dst_pos < 0 || dst_pos as usize + length as usize > dst_len {
        return Err(out_of_bounds(format!(
            "arraycopy: last destination index {} out of bounds for length {}",
            dst_pos as i64 + length as i64,
            dst_len
        )));
    }
    let (src_pos, dst_pos, length) = (src_pos as usize, dst_pos as usize, length as usize);

    match element_check {
        None => {
            let copied = env.with_heap(|heap| heap.copy_array(src, src_pos, dst, dst_pos, length))?;
            if !copied {
                return Err(Throw::Error(VmError::Internal(format!(
                    "arraycopy between {} and {} failed",
                    src_class.name(),
                    dst_class.name()
                ))));
            }
        }
        // Elements are copied one at a time up to the first one that does
        // not fit the destination.
        Some(target) => env.with_heap(|heap| -> ExecResult<()> {
            for i in 0..length {
                let value = heap
                    .array(src)?
                    .load(src_pos + i)
                    .ok_or_else(|| Throw::index_out_of_bounds((src_pos + i) as i32, src_len))?;
                if let Value::Reference(element) = value {
                    if !heap.class_of(element)?.is_assignable_to(&target) {
                        return Err(array_store(format!(
                            "arraycopy: element type mismatch: can not cast one of the elements of {}[] to the type of the destination array, {}",
                            element_name(&src_class),
                            target.java_name()
                        )));
                    }
                }
                heap.array_mut(dst)?.store(dst_pos + i, value);
            }
            Ok(())
        })?,
    }
    Ok(None)
}

/// Validates the array types of an `arraycopy`. Returns the destination
/// component type when each element has to be checked on the way.
fn copy_check(src: &RuntimeClass, dst: &RuntimeClass) -> ExecResult<Option<Arc<RuntimeClass>>> {
    let (from, to) = match (src.component(), dst.component()) {
        (Some(from), Some(to)) => (from, to),
        (None, _) => {
            return Err(array_store(format!(
                "arraycopy: source type {} is not an array",
                src.java_name()
            )))
        }
        (_, None) => {
            return Err(array_store(format!(
                "arraycopy: destination type {} is not an array",
                dst.java_name()
            )))
        }
    };
    match (from, to) {
        (ComponentType::Primitive(a), ComponentType::Primitive(b)) if a == b => Ok(None),
        (ComponentType::Reference(_), ComponentType::Reference(target)) => {
            if src.is_assignable_to(dst) {
                Ok(None)
            } else {
                Ok(Some(target.clone()))
            }
        }
        _ => Err(array_store(format!(
            "arraycopy: type mismatch: can not copy {}[] into {}[]",
            element_name(src),
            element_name(dst)
        ))),
    }
}

fn element_name(array: &RuntimeClass) -> String {
    match array.component() {
        Some(ComponentType::Reference(c)) => c.java_name(),
        Some(ComponentType::Primitive(p)) => format!("{:?}", p).to_lowercase(),
        None => array.java_name(),
    }
}

// ============================================================================
// java/io/PrintStream
// ============================================================================

/// `print`/`println` for every overload. The stream's `fd` field selects
/// standard output (1) or standard error (2).
fn print(env: &mut NativeEnv<'_>, args: &[Value], descriptor: &str, newline: bool) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let fd_slot = env.field_slot(PRINT_STREAM, "fd", "I")?;
    let fd = env.with_heap(|heap| heap.get_field(this, fd_slot))?;
    let mut text = match args.get(1) {
        Some(value) => format_argument(env, descriptor, *value)?,
        None => String::new(),
    };
    if newline {
        text.push('\n');
    }
    let sink = if fd == Value::Int(2) { env.stderr() } else { env.stdout() };
    if let Err(e) = sink.write_str(&text) {
        log::warn!("PrintStream write failed: {}", e);
    }
    Ok(None)
}

fn format_argument(env: &mut NativeEnv<'_>, descriptor: &str, value: Value) -> ExecResult<String> {
    Ok(match (descriptor, value) {
        ("(Z)V", Value::Int(v)) => (v != 0).to_string(),
        ("(C)V", Value::Int(v)) => String::from_utf16_lossy(&[v as u16]),
        ("(I)V", Value::Int(v)) => v.to_string(),
        ("(J)V", Value::Long(v)) => v.to_string(),
        ("(F)V", Value::Float(v)) => format_float(v),
        ("(D)V", Value::Double(v)) => format_double(v),
        (_, Value::Null | Value::Reference(_)) => display_string(env, value)?,
        _ => return Err(bad_arguments("PrintStream.print", &[value])),
    })
}

// ============================================================================
// java/lang/Throwable
// ============================================================================

fn throwable_print_stack_trace(env: &mut NativeEnv<'_>, args: &[Value]) -> ExecResult<Option<Value>> {
    let this = receiver(args)?;
    let mut report = display_string(env, Value::Reference(this))?;
    report.push('\n');
    for line in env.stack_trace(this) {
        report.push_str(&format!("\tat {}\n", line));
    }
    if let Err(e) = env.stderr().write_str(&report) {
        log::warn!("printStackTrace write failed: {}", e);
    }
    Ok(None)
}
