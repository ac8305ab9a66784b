//! Unit tests for Value and ObjectRef

use core_types::{ObjectRef, Value};

#[cfg(test)]
mod value_category_tests {
    use super::*;

    #[test]
    fn test_int_is_category1() {
        assert_eq!(Value::Int(42).category(), 1);
        assert!(!Value::Int(42).is_category2());
    }

    #[test]
    fn test_long_and_double_are_category2() {
        assert!(Value::Long(1).is_category2());
        assert!(Value::Double(1.0).is_category2());
    }

    #[test]
    fn test_references_are_category1() {
        assert_eq!(Value::Null.category(), 1);
        assert_eq!(Value::Reference(ObjectRef::from_index(0)).category(), 1);
    }

    #[test]
    fn test_return_address_is_category1() {
        assert_eq!(Value::ReturnAddress(12).category(), 1);
    }
}

#[cfg(test)]
mod value_accessor_tests {
    use super::*;

    #[test]
    fn test_as_int() {
        assert_eq!(Value::Int(-7).as_int(), Some(-7));
        assert_eq!(Value::Long(-7).as_int(), None);
    }

    #[test]
    fn test_as_long() {
        assert_eq!(Value::Long(i64::MIN).as_long(), Some(i64::MIN));
        assert_eq!(Value::Int(0).as_long(), None);
    }

    #[test]
    fn test_as_float_and_double() {
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::Double(2.5).as_double(), Some(2.5));
        assert!(Value::Float(f32::NAN).as_float().unwrap().is_nan());
    }

    #[test]
    fn test_as_object() {
        let r = ObjectRef::from_index(3);
        assert_eq!(Value::Reference(r).as_object(), Some(r));
        assert_eq!(Value::Null.as_object(), None);
        assert_eq!(Value::Int(3).as_object(), None);
    }

    #[test]
    fn test_is_reference() {
        assert!(Value::Null.is_reference());
        assert!(Value::Reference(ObjectRef::from_index(1)).is_reference());
        assert!(!Value::Int(0).is_reference());
        assert!(!Value::Top.is_reference());
    }

    #[test]
    fn test_default_is_top() {
        assert_eq!(Value::default(), Value::Top);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(0).type_name(), "int");
        assert_eq!(Value::Double(0.0).type_name(), "double");
        assert_eq!(Value::Null.type_name(), "null");
    }
}

#[cfg(test)]
mod object_ref_tests {
    use super::*;

    #[test]
    fn test_handles_compare_by_index() {
        assert_eq!(ObjectRef::from_index(9), ObjectRef::from_index(9));
        assert_ne!(ObjectRef::from_index(9), ObjectRef::from_index(10));
        assert!(ObjectRef::from_index(1) < ObjectRef::from_index(2));
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(ObjectRef::from_index(255).to_string(), "@ff");
    }
}
