#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![warn(clippy::std_instead_of_core)]
#![warn(clippy::std_instead_of_alloc)]

extern crate alloc;

mod tracing_macros;

mod error;
pub use error::*;

mod value;
pub use value::*;

mod call;
pub use call::*;

mod class;
pub use class::*;

mod path;
pub use path::*;

mod pattern;
pub use pattern::*;

mod walk;
pub use walk::*;

mod cow;
pub use cow::*;

mod fig;
pub use fig::*;

mod inline;
pub use inline::*;

mod reflect;
pub use reflect::*;
