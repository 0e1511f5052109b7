//! Payload codec: typed records to and from field maps.
//!
//! Encoding is total. Decoding checks every declared field before any value is
//! extracted, so a record is either fully decoded or rejected as a whole.

use crate::value::{FieldMap, FieldType, Value};

/// A payload failed to decode against its declared schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` should be {expected}, found {found}")]
    WrongType {
        field: &'static str,
        expected: FieldType,
        found: FieldType,
    },
    #[error("field `{field}` has unparsable value {value:?}")]
    Unparsable { field: &'static str, value: String },
    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

/// A named, typed field in a payload schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }

    /// Check that the field is present (if required) and readable as its type.
    pub fn check(&self, fields: &FieldMap) -> Result<(), PayloadError> {
        if !fields.contains_key(self.name) {
            return if self.required {
                Err(PayloadError::MissingField(self.name))
            } else {
                Ok(())
            };
        }
        match self.ty {
            FieldType::String => read_string(fields, self.name).map(drop),
            FieldType::Int => read_int(fields, self.name).map(drop),
            FieldType::Bool => read_bool(fields, self.name).map(drop),
            FieldType::List => read_list(fields, self.name).map(drop),
            FieldType::Bytes | FieldType::Map => {
                let value = &fields[self.name];
                if value.field_type() == self.ty {
                    Ok(())
                } else {
                    Err(PayloadError::WrongType {
                        field: self.name,
                        expected: self.ty,
                        found: value.field_type(),
                    })
                }
            }
        }
    }
}

/// Check a whole schema against a field map.
pub fn check_all(specs: &[FieldSpec], fields: &FieldMap) -> Result<(), PayloadError> {
    specs.iter().try_for_each(|spec| spec.check(fields))
}

/// A composite value with a fixed field schema.
pub trait Record: Sized {
    /// The declared fields, in wire order.
    const FIELDS: &'static [FieldSpec];

    fn to_fields(&self) -> FieldMap;

    /// Decode from fields that already passed [`check_all`] for [`Self::FIELDS`].
    fn from_checked(fields: &FieldMap) -> Result<Self, PayloadError>;

    fn from_fields(fields: &FieldMap) -> Result<Self, PayloadError> {
        check_all(Self::FIELDS, fields)?;
        Self::from_checked(fields)
    }
}

/// Decode a list of records, preserving order.
pub(crate) fn read_records<R: Record>(
    fields: &FieldMap,
    name: &'static str,
) -> Result<Vec<R>, PayloadError> {
    read_list(fields, name)?
        .iter()
        .map(|item| match item {
            Value::Map(inner) => R::from_fields(inner),
            other => Err(PayloadError::WrongType {
                field: name,
                expected: FieldType::Map,
                found: other.field_type(),
            }),
        })
        .collect()
}

pub(crate) fn encode_records<R: Record>(records: &[R]) -> Value {
    Value::List(
        records
            .iter()
            .map(|r| Value::Map(r.to_fields()))
            .collect(),
    )
}

fn require<'a>(fields: &'a FieldMap, name: &'static str) -> Result<&'a Value, PayloadError> {
    fields.get(name).ok_or(PayloadError::MissingField(name))
}

fn wrong_type(name: &'static str, expected: FieldType, found: &Value) -> PayloadError {
    PayloadError::WrongType {
        field: name,
        expected,
        found: found.field_type(),
    }
}

pub(crate) fn read_string(fields: &FieldMap, name: &'static str) -> Result<String, PayloadError> {
    match require(fields, name)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(wrong_type(name, FieldType::String, other)),
    }
}

pub(crate) fn read_opt_string(
    fields: &FieldMap,
    name: &'static str,
) -> Result<Option<String>, PayloadError> {
    if fields.contains_key(name) {
        read_string(fields, name).map(Some)
    } else {
        Ok(None)
    }
}

/// Integers may also arrive as decimal strings from older services.
pub(crate) fn read_int(fields: &FieldMap, name: &'static str) -> Result<i64, PayloadError> {
    match require(fields, name)? {
        Value::Int(n) => Ok(i64::from(*n)),
        Value::Long(n) => Ok(*n),
        Value::String(s) => s.trim().parse().map_err(|_| PayloadError::Unparsable {
            field: name,
            value: s.clone(),
        }),
        other => Err(wrong_type(name, FieldType::Int, other)),
    }
}

pub(crate) fn read_bool(fields: &FieldMap, name: &'static str) -> Result<bool, PayloadError> {
    match require(fields, name)? {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(PayloadError::Unparsable {
                field: name,
                value: s.clone(),
            }),
        },
        other => Err(wrong_type(name, FieldType::Bool, other)),
    }
}

pub(crate) fn read_list<'a>(
    fields: &'a FieldMap,
    name: &'static str,
) -> Result<&'a [Value], PayloadError> {
    match require(fields, name)? {
        Value::List(items) => Ok(items),
        other => Err(wrong_type(name, FieldType::List, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn int_accepts_decimal_string() {
        let fields = map(&[("size", Value::from("42"))]);
        assert_eq!(read_int(&fields, "size"), Ok(42));
    }

    #[test]
    fn int_rejects_garbage_string() {
        let fields = map(&[("size", Value::from("forty"))]);
        assert!(matches!(
            read_int(&fields, "size"),
            Err(PayloadError::Unparsable { field: "size", .. })
        ));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let spec = FieldSpec::optional("hash", FieldType::String);
        assert_eq!(spec.check(&FieldMap::new()), Ok(()));
    }

    #[test]
    fn required_field_reports_missing() {
        let spec = FieldSpec::required("message", FieldType::String);
        assert_eq!(
            spec.check(&FieldMap::new()),
            Err(PayloadError::MissingField("message"))
        );
    }

    #[test]
    fn wrong_type_names_both_sides() {
        let fields = map(&[("validated", Value::Int(1))]);
        let spec = FieldSpec::required("validated", FieldType::Bool);
        assert_eq!(
            spec.check(&fields),
            Err(PayloadError::WrongType {
                field: "validated",
                expected: FieldType::Bool,
                found: FieldType::Int,
            })
        );
    }
}
