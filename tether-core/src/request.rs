//! Request payload decoration, applied to every payload before it is dispatched.
use crate::auth::PROJECT_ID_TOKEN;
use serde_json::Value;

/// Control fields callers may set on a payload. They steer the client and never reach the wire.
pub const CONTROL_FIELDS: [&str; 3] = ["autoPaginate", "autoPaginateVal", "objectMode"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Sorry, we cannot connect to services without a project ID. \
     Set one on the client options or use credentials that carry one."
)]
pub struct MissingProjectId;

/// A payload ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedRequest {
    pub payload: Value,
    /// Taken from the `objectMode` control field.
    pub object_mode: bool,
}

/// Strips the control fields and substitutes the project id placeholder.
///
/// The caller's payload is left untouched.
pub fn decorate(
    payload: &Value,
    project_id: Option<&str>,
) -> Result<DecoratedRequest, MissingProjectId> {
    let mut payload = payload.clone();

    let object_mode = match &mut payload {
        Value::Object(fields) => {
            let object_mode = fields
                .get("objectMode")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            for field in CONTROL_FIELDS {
                fields.remove(field);
            }
            object_mode
        }
        _ => false,
    };

    Ok(DecoratedRequest {
        payload: replace_project_id_token(payload, project_id)?,
        object_mode,
    })
}

/// Replaces every `{{projectId}}` occurring in a string of `value`.
///
/// Fails if a placeholder is present and no real project id is known.
pub fn replace_project_id_token(
    value: Value,
    project_id: Option<&str>,
) -> Result<Value, MissingProjectId> {
    Ok(match value {
        Value::String(s) if s.contains(PROJECT_ID_TOKEN) => {
            let project_id = project_id
                .filter(|id| *id != PROJECT_ID_TOKEN)
                .ok_or(MissingProjectId)?;
            Value::String(s.replace(PROJECT_ID_TOKEN, project_id))
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_project_id_token(item, project_id))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, replace_project_id_token(v, project_id)?)))
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_fields_are_stripped_from_a_copy() {
        let original = json!({
            "message": "hi",
            "autoPaginate": true,
            "autoPaginateVal": 10,
            "objectMode": true
        });

        let decorated = decorate(&original, None).unwrap();

        assert_eq!(decorated.payload, json!({ "message": "hi" }));
        assert!(decorated.object_mode);
        assert_eq!(original["autoPaginate"], json!(true));
    }

    #[test]
    fn object_mode_defaults_to_false() {
        assert!(!decorate(&json!({}), None).unwrap().object_mode);
        assert!(!decorate(&json!({ "objectMode": "yes" }), None).unwrap().object_mode);
    }

    #[test]
    fn placeholders_are_replaced_everywhere() {
        let payload = json!({
            "name": "projects/{{projectId}}/topics/t",
            "nested": { "list": ["{{projectId}}", 1, null] }
        });

        let replaced = replace_project_id_token(payload, Some("my-project")).unwrap();

        assert_eq!(
            replaced,
            json!({
                "name": "projects/my-project/topics/t",
                "nested": { "list": ["my-project", 1, null] }
            })
        );
    }

    #[test]
    fn placeholder_without_project_id_fails() {
        let payload = json!({ "name": "projects/{{projectId}}" });

        assert_eq!(
            replace_project_id_token(payload.clone(), None),
            Err(MissingProjectId)
        );
        assert_eq!(
            replace_project_id_token(payload, Some(PROJECT_ID_TOKEN)),
            Err(MissingProjectId)
        );
    }

    #[test]
    fn payload_without_placeholder_needs_no_project_id() {
        let payload = json!({ "name": "projects/fixed" });
        assert_eq!(replace_project_id_token(payload.clone(), None), Ok(payload));
    }
}
