use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A structural JSON schema: the subset of JSON Schema the core needs
/// to describe metadata documents and to answer key-sequence validity
/// queries. Unknown keywords are preserved through `extra` so schemas
/// shipped by external plugins survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, JsonSchema>,
    #[serde(
        rename = "patternProperties",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub pattern_properties: IndexMap<String, JsonSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
    #[serde(
        rename = "additionalItems",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_items: Option<Box<JsonSchema>>,
    #[serde(rename = "allOf", default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<JsonSchema>,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<JsonSchema>,
    #[serde(rename = "oneOf", default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<JsonSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<JsonSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        rename = "minProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_properties: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<serde_json::Value>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub definitions: IndexMap<String, JsonSchema>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JsonSchema {
    pub fn object() -> Self {
        Self {
            type_: Some("object".to_string()),
            ..Self::default()
        }
    }

    pub fn array() -> Self {
        Self {
            type_: Some("array".to_string()),
            ..Self::default()
        }
    }

    pub fn primitive(type_: &str) -> Self {
        Self {
            type_: Some(type_.to_string()),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: &str, schema: JsonSchema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn with_items(mut self, items: JsonSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required = required.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("JsonSchema serializes infallibly")
    }

    /// Rewrites the schema for key-sequence validity queries:
    ///
    /// - property names are uppercased (first-seen-wins on collision),
    ///   matching the case-insensitive key lookup of object predicates;
    /// - `required` and `dependencies` are cleared so that a document
    ///   holding only the queried keys still validates;
    /// - objects that required properties keep `minProperties >= 1`, so
    ///   an empty object doesn't spuriously satisfy emptiness queries;
    /// - primitive types are normalized to "null" (all primitives are
    ///   equivalent for key-sequence validity);
    /// - `$ref` nodes are left intact; definitions are munged in place.
    pub fn munge(&mut self) {
        for definition in self.definitions.values_mut() {
            definition.munge();
        }
        if self.reference.is_some() {
            return;
        }
        if let Some(not) = self.not.as_mut() {
            not.munge();
        }
        match self.type_.as_deref() {
            Some("array") => {
                if let Some(items) = self.items.as_mut() {
                    items.munge();
                }
                if let Some(additional) = self.additional_items.as_mut() {
                    additional.munge();
                }
                for group in [&mut self.all_of, &mut self.any_of, &mut self.one_of] {
                    for schema in group.iter_mut() {
                        schema.munge();
                    }
                }
            }
            Some("object") => {
                // Metadata schemas are simple enough that dependencies
                // don't participate in key-sequence validity.
                self.dependencies = None;
                let had_required =
                    !self.required.is_empty() || self.min_properties.map_or(false, |m| m >= 1);
                self.properties = munge_properties(std::mem::take(&mut self.properties));
                self.pattern_properties =
                    munge_properties(std::mem::take(&mut self.pattern_properties));
                self.required.clear();
                if had_required {
                    self.min_properties = Some(1);
                }
            }
            _ => {
                self.type_ = Some("null".to_string());
            }
        }
    }

    /// A munged copy of this schema.
    pub fn munged(&self) -> JsonSchema {
        let mut munged = self.clone();
        munged.munge();
        munged
    }
}

fn munge_properties(properties: IndexMap<String, JsonSchema>) -> IndexMap<String, JsonSchema> {
    let mut upcased = IndexMap::new();
    for (name, mut schema) in properties {
        schema.munge();
        upcased.entry(name.to_uppercase()).or_insert(schema);
    }
    upcased
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> JsonSchema {
        serde_json::from_value(serde_json::json!({
            "type": "object",
            "required": ["architecture"],
            "properties": {
                "architecture": {"type": "string"},
                "coreCount": {"type": "integer"},
                "tags": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": {"type": "string"},
                            "value": {"type": "string"},
                        },
                    },
                },
            },
        }))
        .unwrap()
    }

    #[test]
    fn munges_a_metadata_schema() {
        insta::assert_json_snapshot!(fixture().munged(), @r###"
        {
          "type": "object",
          "properties": {
            "ARCHITECTURE": {
              "type": "null"
            },
            "CORECOUNT": {
              "type": "null"
            },
            "TAGS": {
              "type": "array",
              "items": {
                "type": "object",
                "properties": {
                  "KEY": {
                    "type": "null"
                  },
                  "VALUE": {
                    "type": "null"
                  }
                }
              }
            }
          },
          "minProperties": 1
        }
        "###);
    }

    #[test]
    fn first_seen_property_wins_on_upcase_collisions() {
        let schema: JsonSchema = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {
                "Key": {"type": "string"},
                "key": {"type": "integer"},
            },
        }))
        .unwrap();
        let munged = schema.munged();
        assert_eq!(munged.properties.len(), 1);
        assert_eq!(
            munged.properties.get("KEY").unwrap().type_.as_deref(),
            Some("null")
        );
    }

    #[test]
    fn refs_are_left_intact() {
        let schema: JsonSchema = serde_json::from_value(serde_json::json!({
            "$ref": "#/definitions/Tag",
            "definitions": {
                "Tag": {
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                },
            },
        }))
        .unwrap();
        let munged = schema.munged();
        assert_eq!(munged.reference.as_deref(), Some("#/definitions/Tag"));
        assert!(munged.definitions.get("Tag").unwrap().properties.contains_key("KEY"));
    }

    #[test]
    fn round_trips_unknown_keywords() {
        let value = serde_json::json!({
            "type": "string",
            "pattern": "^sha256:",
        });
        let schema: JsonSchema = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(schema.to_value(), value);
    }
}
