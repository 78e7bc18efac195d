//! Error type shared by the object model, the proxy and the config layer.

use alloc::string::String;
use alloc::rc::Rc;

/// Errors raised while reading, mutating, calling or finalizing values.
///
/// Structural anomalies met during traversal (cycles, unset slots) are never
/// reported through this type; they are recovered where they happen.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum FigError {
    /// The value has no attribute with this name.
    AttributeNotFound {
        /// Type name of the value that was accessed.
        type_name: Rc<str>,
        /// The attribute that was requested.
        name: Rc<str>,
    },

    /// A mapping lookup or removal found no entry for the key.
    KeyNotFound {
        /// Repr of the missing key.
        key: String,
    },

    /// A sequence index fell outside the sequence.
    IndexOutOfRange {
        /// The index that was requested.
        index: i64,
        /// Length of the sequence.
        len: usize,
    },

    /// Item access on a value that has no items.
    NotSubscriptable {
        /// Type name of the value.
        type_name: Rc<str>,
    },

    /// Mutation of a value that cannot change (tuples, scalars).
    Immutable {
        /// Type name of the value.
        type_name: Rc<str>,
    },

    /// A call on something that is not a function or a bound method.
    NotCallable {
        /// Repr of the value that was called.
        repr: String,
    },

    /// An argument or operand had the wrong type.
    WrongType {
        /// What the operation expected.
        expected: &'static str,
        /// Type name of what it got.
        actual: Rc<str>,
    },

    /// A call was missing a required positional argument.
    MissingArgument {
        /// The callee.
        callee: Rc<str>,
        /// Position of the missing argument.
        position: usize,
    },

    /// A call received an argument it does not accept.
    UnexpectedArgument {
        /// The callee.
        callee: Rc<str>,
        /// Name (or position) of the argument.
        argument: String,
    },

    /// Instantiating a class left a required field without a value.
    MissingField {
        /// Class name.
        class: Rc<str>,
        /// The field without a value.
        field: Rc<str>,
    },

    /// Instantiating a class was given a field it does not declare.
    UnexpectedField {
        /// Class name.
        class: Rc<str>,
        /// The undeclared field.
        field: Rc<str>,
    },

    /// `make` was called on a config that is not nested in a parent class.
    NoParentClass {
        /// Config class name.
        class: Rc<str>,
    },

    /// The bases of a class admit no consistent method-resolution order.
    InconsistentMro {
        /// Class name.
        class: Rc<str>,
    },

    /// A reflected Rust type has no counterpart in the object model.
    Unsupported {
        /// The type identifier from the shape.
        type_name: String,
    },

    /// Error raised by user code (methods, functions, finalize hooks).
    Custom {
        /// Message.
        message: String,
    },
}

impl FigError {
    /// Build a [`FigError::Custom`] from any message.
    pub fn custom(message: impl Into<String>) -> Self {
        FigError::Custom {
            message: message.into(),
        }
    }

    /// True for errors that mean "this attribute is not there".
    ///
    /// Enumeration and `update` swallow exactly these.
    pub fn is_attribute_not_found(&self) -> bool {
        matches!(self, FigError::AttributeNotFound { .. })
    }
}

impl core::fmt::Display for FigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FigError::AttributeNotFound { type_name, name } => {
                write!(f, "'{type_name}' object has no attribute '{name}'")
            }
            FigError::KeyNotFound { key } => write!(f, "key not found: {key}"),
            FigError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for sequence of length {len}")
            }
            FigError::NotSubscriptable { type_name } => {
                write!(f, "'{type_name}' object is not subscriptable")
            }
            FigError::Immutable { type_name } => {
                write!(f, "'{type_name}' object does not support mutation")
            }
            FigError::NotCallable { repr } => write!(f, "{repr} is not callable"),
            FigError::WrongType { expected, actual } => {
                write!(f, "expected {expected}, got '{actual}'")
            }
            FigError::MissingArgument { callee, position } => {
                write!(f, "{callee}() missing positional argument {position}")
            }
            FigError::UnexpectedArgument { callee, argument } => {
                write!(f, "{callee}() got an unexpected argument '{argument}'")
            }
            FigError::MissingField { class, field } => {
                write!(f, "{class}.{field} has no value and no default")
            }
            FigError::UnexpectedField { class, field } => {
                write!(f, "'{class}' object has no field '{field}'")
            }
            FigError::NoParentClass { class } => {
                write!(f, "{class} must be nested in a parent class to make it")
            }
            FigError::InconsistentMro { class } => {
                write!(
                    f,
                    "cannot create a consistent method resolution order for {class}"
                )
            }
            FigError::Unsupported { type_name } => {
                write!(f, "{type_name} has no representation in the object model")
            }
            FigError::Custom { message } => f.write_str(message),
        }
    }
}

impl core::error::Error for FigError {}
