//! Unit tests for VmError and ExceptionKind

use core_types::{ExceptionKind, VmError};

#[cfg(test)]
mod vm_error_tests {
    use super::*;

    #[test]
    fn test_linkage_family_maps_to_java_lang_errors() {
        let cases = [
            (VmError::ClassFormat(String::new()), "java/lang/ClassFormatError"),
            (VmError::Verify(String::new()), "java/lang/VerifyError"),
            (VmError::ClassNotFound(String::new()), "java/lang/NoClassDefFoundError"),
            (VmError::Linkage(String::new()), "java/lang/LinkageError"),
            (VmError::NoSuchMethod(String::new()), "java/lang/NoSuchMethodError"),
            (VmError::NoSuchField(String::new()), "java/lang/NoSuchFieldError"),
            (VmError::OutOfMemory(String::new()), "java/lang/OutOfMemoryError"),
            (VmError::StackOverflow, "java/lang/StackOverflowError"),
        ];
        for (err, class) in cases {
            assert_eq!(err.throwable_class(), Some(class), "{:?}", err);
        }
    }

    #[test]
    fn test_initialization_error_message() {
        let err = VmError::Initialization {
            class: "Config".into(),
            message: "java/lang/ArithmeticException: / by zero".into(),
        };
        assert_eq!(
            err.throwable_class(),
            Some("java/lang/ExceptionInInitializerError")
        );
        assert_eq!(
            err.detail_message().unwrap(),
            "Config: java/lang/ArithmeticException: / by zero"
        );
    }

    #[test]
    fn test_stack_overflow_has_no_message() {
        assert!(VmError::StackOverflow.detail_message().is_none());
        assert_eq!(VmError::StackOverflow.to_string(), "StackOverflowError");
    }

    #[test]
    fn test_uncaught_is_fatal() {
        let err = VmError::UncaughtException {
            thread: "main".into(),
            class: "java/lang/RuntimeException".into(),
            message: None,
            stack_trace: vec!["at Main.main(Main.java:3)".into()],
        };
        assert!(err.throwable_class().is_none());
    }

    #[test]
    fn test_errors_are_cloneable_and_comparable() {
        let err = VmError::ClassNotFound("Missing".into());
        assert_eq!(err.clone(), err);
    }
}

#[cfg(test)]
mod exception_kind_tests {
    use super::*;

    #[test]
    fn test_null_pointer_class() {
        assert_eq!(
            ExceptionKind::NullPointer.class_name(),
            "java/lang/NullPointerException"
        );
    }

    #[test]
    fn test_all_kinds_distinct() {
        let names: std::collections::HashSet<_> =
            ExceptionKind::all().iter().map(|k| k.class_name()).collect();
        assert_eq!(names.len(), ExceptionKind::all().len());
    }
}
