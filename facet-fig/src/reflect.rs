//! Build dynamic values from any type that derives [`Facet`].
//!
//! Structs become records whose class declares one slot per field, in
//! declaration order, so they traverse, finalize and copy exactly like
//! hand-declared records. One class is made per struct shape and reused for
//! every instance met during a conversion.
//!
//! | Rust                              | Value                          |
//! |-----------------------------------|--------------------------------|
//! | `()`                              | `None`                         |
//! | `bool`, integers, floats          | `Bool`, `Int`, `Float`         |
//! | `char`, `&str`, `String`, `Cow`   | `Str`                          |
//! | other scalars                     | `Str` of their `Display`       |
//! | `Option<T>`                       | the value, or `None`           |
//! | `Vec<T>`, arrays, slices          | list                           |
//! | maps                              | dict                           |
//! | sets                              | set                            |
//! | structs                           | record                         |
//! | unit enum variants                | `Str` of the variant name      |
//! | other enum variants               | record of class `Enum::Variant`|

use alloc::format;
use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use std::collections::HashMap;

use facet::{Facet, Field, ScalarType, Shape};
use facet_reflect::{HasFields, Peek};

use crate::FigError;
use crate::class::{Class, Record};
use crate::tracing_macros::trace;
use crate::value::Value;

/// Convert `value` into the object model.
pub fn from_facet<'facet, T: Facet<'facet> + ?Sized>(value: &T) -> Result<Value, FigError> {
    let mut bridge = Bridge::default();
    bridge.convert(Peek::new(value))
}

#[derive(Default)]
struct Bridge {
    classes: HashMap<(usize, usize), Rc<Class>>,
}

fn unsupported(shape: &Shape) -> FigError {
    FigError::Unsupported {
        type_name: shape.to_string(),
    }
}

impl Bridge {
    fn convert(&mut self, peek: Peek<'_, '_>) -> Result<Value, FigError> {
        let peek = peek.innermost_peek();
        let shape = peek.shape();

        if let Some(scalar) = peek.scalar_type() {
            return scalar_value(peek, scalar);
        }
        if let Ok(option) = peek.into_option() {
            return match option.value() {
                Some(inner) => self.convert(inner),
                None => Ok(Value::None),
            };
        }
        if let Ok(list) = peek.into_list_like() {
            let items = list
                .iter()
                .map(|item| self.convert(item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::list(items));
        }
        if let Ok(map) = peek.into_map() {
            let mut entries = Vec::new();
            for (key, value) in map.iter() {
                entries.push((self.convert(key)?, self.convert(value)?));
            }
            return Ok(Value::dict(entries));
        }
        if let Ok(set) = peek.into_set() {
            let members = set
                .iter()
                .map(|member| self.convert(member))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::set(members));
        }
        if let Ok(strukt) = peek.into_struct() {
            let fields = strukt.ty().fields;
            let class = self.class_for(shape, 0, shape.type_identifier, fields)?;
            let mut record = Record::new(&class);
            for (field, value) in strukt.fields() {
                record.set_attr(field.name, self.convert(value)?)?;
            }
            return Ok(Value::from(record));
        }
        if let Ok(enumm) = peek.into_enum() {
            let index = enumm.variant_index().map_err(|_| unsupported(shape))?;
            let variant = &enumm.variants()[index];
            let fields = variant.data.fields;
            if fields.is_empty() {
                return Ok(Value::from(variant.name));
            }
            let name = format!("{}::{}", shape.type_identifier, variant.name);
            let class = self.class_for(shape, index + 1, &name, fields)?;
            let mut record = Record::new(&class);
            for (position, field) in fields.iter().enumerate() {
                if let Some(value) = enumm.field(position).map_err(|_| unsupported(shape))? {
                    record.set_attr(field.name, self.convert(value)?)?;
                }
            }
            return Ok(Value::from(record));
        }

        Err(unsupported(shape))
    }

    /// The class for a struct shape, or for one variant of an enum shape.
    fn class_for(
        &mut self,
        shape: &'static Shape,
        variant: usize,
        name: &str,
        fields: &'static [Field],
    ) -> Result<Rc<Class>, FigError> {
        let key = (shape as *const Shape as usize, variant);
        if let Some(class) = self.classes.get(&key) {
            return Ok(class.clone());
        }
        let class = fields
            .iter()
            .fold(Class::builder(name), |builder, field| builder.slot(field.name))
            .build()?;
        trace!("reflect: class {} for shape {}", name, shape);
        self.classes.insert(key, class.clone());
        Ok(class)
    }
}

fn scalar_value(peek: Peek<'_, '_>, scalar: ScalarType) -> Result<Value, FigError> {
    let wrong = |_| unsupported(peek.shape());
    let value = match scalar {
        ScalarType::Unit => Value::None,
        ScalarType::Bool => Value::Bool(*peek.get::<bool>().map_err(wrong)?),
        ScalarType::Char => Value::from(peek.get::<char>().map_err(wrong)?.to_string()),
        ScalarType::F32 => Value::Float(f64::from(*peek.get::<f32>().map_err(wrong)?)),
        ScalarType::F64 => Value::Float(*peek.get::<f64>().map_err(wrong)?),
        ScalarType::U8 => Value::Int(i64::from(*peek.get::<u8>().map_err(wrong)?)),
        ScalarType::U16 => Value::Int(i64::from(*peek.get::<u16>().map_err(wrong)?)),
        ScalarType::U32 => Value::Int(i64::from(*peek.get::<u32>().map_err(wrong)?)),
        ScalarType::U64 => int(*peek.get::<u64>().map_err(wrong)?, peek)?,
        ScalarType::U128 => int(*peek.get::<u128>().map_err(wrong)?, peek)?,
        ScalarType::USize => int(*peek.get::<usize>().map_err(wrong)?, peek)?,
        ScalarType::I8 => Value::Int(i64::from(*peek.get::<i8>().map_err(wrong)?)),
        ScalarType::I16 => Value::Int(i64::from(*peek.get::<i16>().map_err(wrong)?)),
        ScalarType::I32 => Value::Int(i64::from(*peek.get::<i32>().map_err(wrong)?)),
        ScalarType::I64 => Value::Int(*peek.get::<i64>().map_err(wrong)?),
        ScalarType::I128 => int(*peek.get::<i128>().map_err(wrong)?, peek)?,
        ScalarType::ISize => int(*peek.get::<isize>().map_err(wrong)?, peek)?,
        _ => match peek.as_str() {
            Some(text) => Value::from(text),
            None => Value::from(peek.to_string()),
        },
    };
    Ok(value)
}

fn int<N: TryInto<i64>>(n: N, peek: Peek<'_, '_>) -> Result<Value, FigError> {
    n.try_into()
        .map(Value::Int)
        .map_err(|_| unsupported(peek.shape()))
}
