use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value crossing the host/guest boundary
///
/// `None` is the guest "nothing" sentinel. Backends convert their native
/// values into this shape before handing them to the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuestValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<GuestValue>),
    Map(BTreeMap<String, GuestValue>),
}

impl GuestValue {
    pub fn is_none(&self) -> bool {
        matches!(self, GuestValue::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GuestValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            GuestValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GuestValue]> {
        match self {
            GuestValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, GuestValue>> {
        match self {
            GuestValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&GuestValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            GuestValue::None => "none",
            GuestValue::Bool(_) => "bool",
            GuestValue::Int(_) => "int",
            GuestValue::Float(_) => "float",
            GuestValue::Str(_) => "str",
            GuestValue::List(_) => "list",
            GuestValue::Map(_) => "map",
        }
    }

    /// Build a map value from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, GuestValue)>,
    {
        GuestValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for GuestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestValue::None => write!(f, "none"),
            GuestValue::Bool(b) => write!(f, "{}", b),
            GuestValue::Int(i) => write!(f, "{}", i),
            GuestValue::Float(x) => write!(f, "{}", x),
            GuestValue::Str(s) => write!(f, "{}", s),
            GuestValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            GuestValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<()> for GuestValue {
    fn from(_: ()) -> Self {
        GuestValue::None
    }
}

impl From<bool> for GuestValue {
    fn from(value: bool) -> Self {
        GuestValue::Bool(value)
    }
}

impl From<i64> for GuestValue {
    fn from(value: i64) -> Self {
        GuestValue::Int(value)
    }
}

impl From<i32> for GuestValue {
    fn from(value: i32) -> Self {
        GuestValue::Int(value.into())
    }
}

impl From<f64> for GuestValue {
    fn from(value: f64) -> Self {
        GuestValue::Float(value)
    }
}

impl From<&str> for GuestValue {
    fn from(value: &str) -> Self {
        GuestValue::Str(value.to_string())
    }
}

impl From<String> for GuestValue {
    fn from(value: String) -> Self {
        GuestValue::Str(value)
    }
}

impl From<Vec<GuestValue>> for GuestValue {
    fn from(value: Vec<GuestValue>) -> Self {
        GuestValue::List(value)
    }
}

impl<T: Into<GuestValue>> From<Option<T>> for GuestValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_variant() {
        assert_eq!(GuestValue::from(42).as_int(), Some(42));
        assert_eq!(GuestValue::from("hi").as_str(), Some("hi"));
        assert_eq!(GuestValue::from(true).as_bool(), Some(true));
        assert_eq!(GuestValue::from(1.5).as_int(), None);
        assert!(GuestValue::from(None::<i64>).is_none());
    }

    #[test]
    fn test_map_lookup() {
        let value = GuestValue::map([("player", "steve".into()), ("level", 3.into())]);
        assert_eq!(value.get("player").and_then(GuestValue::as_str), Some("steve"));
        assert_eq!(value.get("missing"), None);
        assert_eq!(GuestValue::Int(1).get("player"), None);
    }

    #[test]
    fn test_display_nested() {
        let value = GuestValue::List(vec![1.into(), GuestValue::map([("a", "b".into())])]);
        assert_eq!(value.to_string(), "[1, {a: b}]");
    }
}
