//! Predefined graph queries.
//!
//! The catalog is fixed at build time and shared read-only; views are addressed by their position.

use crate::err::{EvtxGraphError, MalformedInputError, Result};

use serde::Serialize;

use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
}

/// A user fillable parameter of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    /// Pre-filled value shown to the user.
    pub value: &'static str,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub labels: &'static [&'static str],
    pub supported_os: &'static [&'static str],
    pub form_data: &'static [FormField],
    /// Cypher with `{placeholder}` parameters.
    pub query: &'static str,
}

/// A catalog entry together with its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub id: usize,
    #[serde(flatten)]
    pub template: &'static ViewTemplate,
}

const WINDOWS_LOGIN_FORM: &[FormField] = &[
    FormField {
        name: "username",
        label: "Username",
        value: "",
        input_type: InputType::Text,
        required: true,
    },
    FormField {
        name: "machine",
        label: "Machine",
        value: "",
        input_type: InputType::Text,
        required: false,
    },
];

static CATALOG: LazyLock<Vec<ViewTemplate>> = LazyLock::new(|| {
    vec![
        ViewTemplate {
            name: "Entire graph",
            description: "Show the entire graph.",
            labels: &["Browser"],
            supported_os: &["Darwin", "Linux", "Windows"],
            form_data: &[],
            query: "MATCH (:Sketch{sketch_id:{sketch_id}})<-[:HAS]-(a)-[b]->(c) RETURN *",
        },
        ViewTemplate {
            name: "Windows interactive logins",
            description: "Windows interactive logins.",
            labels: &[],
            supported_os: &["Windows"],
            form_data: WINDOWS_LOGIN_FORM,
            query: "MATCH (:Sketch{sketch_id:{sketch_id}})<-[:HAS]-(user:WindowsADUser)-[r1:ACCESS]->(m1:WindowsMachine) \
                    WHERE r1.method = \"Interactive\" AND user.username = {username} RETURN *",
        },
        ViewTemplate {
            name: "All Windows logins",
            description: "Windows interactive logins.",
            labels: &[],
            supported_os: &["Windows"],
            form_data: &[],
            query: "MATCH (:Sketch{sketch_id:{sketch_id}})<-[:HAS]-(user:WindowsADUser)-[r1:ACCESS]->(m1:WindowsMachine) RETURN *",
        },
    ]
});

/// Every view, in catalog order.
pub fn list_views() -> Vec<View> {
    CATALOG
        .iter()
        .enumerate()
        .map(|(id, template)| View { id, template })
        .collect()
}

pub fn get_view(id: usize) -> Result<View> {
    CATALOG
        .get(id)
        .map(|template| View { id, template })
        .ok_or(EvtxGraphError::ViewNotFound {
            id,
            count: CATALOG.len(),
        })
}

impl View {
    /// Names of the `{placeholder}` parameters in the query, in order of first use.
    ///
    /// Cypher map literals (`{key:value}`) are not placeholders.
    pub fn placeholders(&self) -> Vec<&'static str> {
        let query = self.template.query;
        let mut names: Vec<&'static str> = Vec::new();
        let mut rest = query;

        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                break;
            };

            let candidate = &after[..end];
            let is_name = !candidate.is_empty()
                && candidate
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');

            if is_name {
                if !names.contains(&candidate) {
                    names.push(candidate);
                }
                rest = &after[end + 1..];
            } else {
                rest = after;
            }
        }

        names
    }

    /// Checks that every required form field has a non-blank value in `values`.
    pub fn check_form(&self, values: &HashMap<String, String>) -> Result<()> {
        for field in self.template.form_data.iter().filter(|f| f.required) {
            let filled = values
                .get(field.name)
                .is_some_and(|v| !v.trim().is_empty());

            if !filled {
                return Err(MalformedInputError::MissingFormField {
                    field: field.name.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ids_follow_declaration_order() {
        let views = list_views();

        assert_eq!(views.len(), 3);
        assert_eq!(
            views.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(views[0].template.name, "Entire graph");
        assert_eq!(views[2].template.name, "All Windows logins");
        assert_eq!(list_views(), views);
    }

    #[test]
    fn test_get_view() {
        let view = get_view(1).unwrap();

        assert_eq!(view.id, 1);
        assert_eq!(view.template.name, "Windows interactive logins");
        assert_eq!(view, list_views()[1]);
    }

    #[test]
    fn test_out_of_range_view_is_not_found() {
        let err = get_view(3).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "graph view 3 does not exist (catalog has 3 views)"
        );
        assert!(get_view(usize::MAX).is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(get_view(0).unwrap().placeholders(), vec!["sketch_id"]);
        assert_eq!(
            get_view(1).unwrap().placeholders(),
            vec!["sketch_id", "username"]
        );
    }

    #[test]
    fn test_check_form() {
        let view = get_view(1).unwrap();
        let mut values = HashMap::new();

        let err = view.check_form(&values).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);

        values.insert("username".to_string(), "   ".to_string());
        assert!(view.check_form(&values).is_err());

        values.insert("username".to_string(), "alice".to_string());
        assert!(view.check_form(&values).is_ok());

        assert!(get_view(2).unwrap().check_form(&HashMap::new()).is_ok());
    }

    #[test]
    fn test_serializes_like_the_web_api() {
        let json = serde_json::to_value(get_view(1).unwrap()).unwrap();

        assert_eq!(json["id"], 1);
        assert_eq!(json["name"], "Windows interactive logins");
        assert_eq!(json["form_data"][0]["type"], "text");
        assert_eq!(json["form_data"][0]["required"], true);
    }
}
