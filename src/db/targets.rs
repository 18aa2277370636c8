//! Polymorphic target references.
//!
//! Interactions, resources, and learning entries point at either a blog post
//! or a project. Rather than carrying a free-form string next to a UUID,
//! handlers parse the pair into a [`TargetRef`] up front and resolve
//! existence through the kind -> table registry here.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// The kinds of entity an interaction or attachment can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Blog,
    Project,
}

impl TargetKind {
    pub fn parse(s: &str) -> Option<TargetKind> {
        match s {
            "blog" => Some(TargetKind::Blog),
            "project" => Some(TargetKind::Project),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Blog => "blog",
            TargetKind::Project => "project",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            TargetKind::Blog => "blog_posts",
            TargetKind::Project => "projects",
        }
    }
}

/// A validated (kind, id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub id: Uuid,
}

impl TargetRef {
    pub fn parse(kind: &str, id: Uuid) -> Option<TargetRef> {
        TargetKind::parse(kind).map(|kind| TargetRef { kind, id })
    }

    /// True when the referenced row exists. The table name comes from the
    /// registry above, never from request input.
    pub async fn exists(&self, pool: &PgPool) -> Result<bool, sqlx::Error> {
        let query = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", self.kind.table());
        let (found,): (bool,) = sqlx::query_as(&query).bind(self.id).fetch_one(pool).await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!(TargetKind::parse("blog"), Some(TargetKind::Blog));
        assert_eq!(TargetKind::parse("project"), Some(TargetKind::Project));
        assert_eq!(TargetKind::parse("resource"), None);
        assert_eq!(TargetKind::parse("Blog"), None);
    }

    #[test]
    fn test_kind_round_trips_through_as_str() {
        for kind in [TargetKind::Blog, TargetKind::Project] {
            assert_eq!(TargetKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_target_ref_deserializes_tagged_pair() {
        let r: TargetRef = serde_json::from_str(
            r#"{"type":"project","id":"7f3b7e9a-0d0f-4a7a-9b5a-0d8f3f1c2e11"}"#,
        )
        .unwrap();
        assert_eq!(r.kind, TargetKind::Project);
    }
}
