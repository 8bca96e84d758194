use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(FormId);
id_newtype!(ControlId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    File(FilePart),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::File(file) => file.file_name.is_empty() && file.bytes.is_empty(),
        }
    }
}

/// Ordered name/value pairs captured from a form at submission time.
///
/// Names may repeat; every occurrence is kept in insertion order so
/// multi-value fields (checkbox groups, multi-selects, multiple file inputs)
/// survive into the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    entries: Vec<(String, FieldValue)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: FieldValue) {
        self.entries.push((name.into(), value));
    }

    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.append(name, FieldValue::Text(value.into()));
    }

    pub fn append_file(&mut self, name: impl Into<String>, file: FilePart) {
        self.append(name, FieldValue::File(file));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FieldValue> {
        self.entries
            .iter()
            .filter(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_files(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, value)| matches!(value, FieldValue::File(_)))
    }

    /// Pairs suitable for a URL query string. Files contribute their file name.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    FieldValue::Text(text) => text.clone(),
                    FieldValue::File(file) => file.file_name.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl<N, V> FromIterator<(N, V)> for FieldSet
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.append_text(name, value);
        }
        fields
    }
}
