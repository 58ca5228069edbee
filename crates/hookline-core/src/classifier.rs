//! Classification of mutation records into named business events.
//!
//! The classifier holds a static table mapping collection names to entity
//! kinds with a declared delivery priority. Update mutations are refined
//! into `status_changed`, `assigned` or `archived` verbs when the update
//! description touches the respective field. Unknown collections are not
//! dropped: they classify as a generic kind named after the collection at
//! low priority.

use serde::{Deserialize, Serialize};

use crate::event::{Event, MutationRecord, Operation};

/// Entity kinds the relay projects dedicated payload blocks for.
///
/// Kinds without a dedicated projection fall through to
/// [`EntityKind::Generic`], which carries the collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Tracker issue
    Issue,
    /// Project container
    Project,
    /// Comment attached to another entity
    Comment,
    /// Uploaded file attachment
    Attachment,
    /// Milestone inside a project
    Milestone,
    /// Any collection without a dedicated projection
    #[serde(untagged)]
    Generic(String),
}

impl EntityKind {
    /// The kind name as it appears in event types and payloads
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            EntityKind::Issue => "issue",
            EntityKind::Project => "project",
            EntityKind::Comment => "comment",
            EntityKind::Attachment => "attachment",
            EntityKind::Milestone => "milestone",
            EntityKind::Generic(name) => name,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Delivery priority declared per collection, ordinal 1 (high) to 3 (low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served first
    High = 1,
    /// Default tier
    Medium = 2,
    /// Served when nothing higher is ready
    Low = 3,
}

impl Priority {
    /// Ordinal value used by the delivery queue (1..=3)
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

/// Operation verb appearing as the second segment of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Entity came into existence
    Created,
    /// Entity fields changed
    Updated,
    /// Entity was removed
    Deleted,
    /// The status field changed
    StatusChanged,
    /// The assignee field changed
    Assigned,
    /// The entity was archived
    Archived,
    /// Sub-entity (comment, attachment) was added
    Added,
}

impl OperationKind {
    /// Convert to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Created => "created",
            OperationKind::Updated => "updated",
            OperationKind::Deleted => "deleted",
            OperationKind::StatusChanged => "status_changed",
            OperationKind::Assigned => "assigned",
            OperationKind::Archived => "archived",
            OperationKind::Added => "added",
        }
    }
}

/// Per-collection classification rule
#[derive(Debug, Clone)]
struct CollectionRule {
    collection: &'static str,
    kind: EntityKind,
    priority: Priority,
    /// Field whose update refines the verb to `status_changed`
    status_field: Option<&'static str>,
    /// Field whose update refines the verb to `assigned`
    assignee_field: Option<&'static str>,
    /// Field whose update refines the verb to `archived`
    archived_field: Option<&'static str>,
    /// Verb used for inserts (`created` unless the kind is additive)
    insert_verb: OperationKind,
}

/// Result of classifying one mutation record
#[derive(Debug, Clone)]
pub struct Classification {
    /// The derived event
    pub event: Event,
    /// Entity kind for payload projection
    pub kind: EntityKind,
    /// Delivery priority for the queue
    pub priority: Priority,
}

/// Maps (collection, operation, update description) to an event type.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    _private: (),
}

const RULES: &[CollectionRule] = &[
    CollectionRule {
        collection: "issues",
        kind: EntityKind::Issue,
        priority: Priority::High,
        status_field: Some("status"),
        assignee_field: Some("assignee"),
        archived_field: None,
        insert_verb: OperationKind::Created,
    },
    CollectionRule {
        collection: "projects",
        kind: EntityKind::Project,
        priority: Priority::Medium,
        status_field: None,
        assignee_field: None,
        archived_field: Some("archived"),
        insert_verb: OperationKind::Created,
    },
    CollectionRule {
        collection: "comments",
        kind: EntityKind::Comment,
        priority: Priority::Medium,
        status_field: None,
        assignee_field: None,
        archived_field: None,
        insert_verb: OperationKind::Added,
    },
    CollectionRule {
        collection: "attachments",
        kind: EntityKind::Attachment,
        priority: Priority::Low,
        status_field: None,
        assignee_field: None,
        archived_field: None,
        insert_verb: OperationKind::Added,
    },
    CollectionRule {
        collection: "milestones",
        kind: EntityKind::Milestone,
        priority: Priority::Medium,
        status_field: Some("status"),
        assignee_field: None,
        archived_field: None,
        insert_verb: OperationKind::Created,
    },
];

impl Classifier {
    /// Create a classifier with the built-in collection table
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Classify a mutation record into an event.
    ///
    /// Never fails: unknown collections yield a generic entity kind equal
    /// to the collection name at low priority.
    #[must_use]
    pub fn classify(&self, record: &MutationRecord) -> Classification {
        let rule = RULES.iter().find(|r| r.collection == record.collection);

        let (kind, priority) = match rule {
            Some(r) => (r.kind.clone(), r.priority),
            None => (EntityKind::Generic(record.collection.clone()), Priority::Low),
        };

        let verb = Self::derive_verb(record, rule);
        let event_type = format!("{}.{}", kind.name(), verb.as_str());

        let event = Event {
            id: Event::derive_id(record),
            event_type,
            entity_kind: kind.name().to_string(),
            timestamp: record.cluster_time,
            collection: record.collection.clone(),
            operation: record.operation,
            fingerprint: Event::fingerprint_of(record),
        };

        Classification {
            event,
            kind,
            priority,
        }
    }

    fn derive_verb(record: &MutationRecord, rule: Option<&CollectionRule>) -> OperationKind {
        match record.operation {
            Operation::Insert => rule.map_or(OperationKind::Created, |r| r.insert_verb),
            Operation::Delete => OperationKind::Deleted,
            Operation::Update => {
                let Some(desc) = record.update_description.as_ref() else {
                    return OperationKind::Updated;
                };
                let Some(rule) = rule else {
                    return OperationKind::Updated;
                };
                if rule.status_field.is_some_and(|f| desc.touches(f)) {
                    OperationKind::StatusChanged
                } else if rule.assignee_field.is_some_and(|f| desc.touches(f)) {
                    OperationKind::Assigned
                } else if rule.archived_field.is_some_and(|f| desc.touches(f)) {
                    OperationKind::Archived
                } else {
                    OperationKind::Updated
                }
            }
        }
    }

    /// Static catalog of the event types the built-in table can emit.
    #[must_use]
    pub fn event_type_catalog() -> Vec<String> {
        let mut catalog = Vec::new();
        for rule in RULES {
            let kind = rule.kind.name();
            catalog.push(format!("{kind}.{}", rule.insert_verb.as_str()));
            catalog.push(format!("{kind}.updated"));
            catalog.push(format!("{kind}.deleted"));
            if rule.status_field.is_some() {
                catalog.push(format!("{kind}.status_changed"));
            }
            if rule.assignee_field.is_some() {
                catalog.push(format!("{kind}.assigned"));
            }
            if rule.archived_field.is_some() {
                catalog.push(format!("{kind}.archived"));
            }
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ResumeToken, UpdateDescription};
    use chrono::DateTime;
    use serde_json::json;

    fn record(collection: &str, operation: Operation) -> MutationRecord {
        MutationRecord {
            resume_token: ResumeToken::new("7"),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: collection.to_string(),
            operation,
            document_key: "D1".to_string(),
            post_image: Some(json!({"_id": "D1"})),
            pre_image: None,
            update_description: None,
        }
    }

    fn update_touching(collection: &str, field: &str) -> MutationRecord {
        let mut rec = record(collection, Operation::Update);
        let mut desc = UpdateDescription::default();
        desc.updated_fields.insert(field.to_string(), json!("x"));
        rec.update_description = Some(desc);
        rec
    }

    #[test]
    fn test_insert_classifies_as_created() {
        let c = Classifier::new();
        let out = c.classify(&record("issues", Operation::Insert));
        assert_eq!(out.event.event_type, "issue.created");
        assert_eq!(out.kind, EntityKind::Issue);
        assert_eq!(out.priority, Priority::High);
    }

    #[test]
    fn test_comment_insert_classifies_as_added() {
        let c = Classifier::new();
        let out = c.classify(&record("comments", Operation::Insert));
        assert_eq!(out.event.event_type, "comment.added");
    }

    #[test]
    fn test_status_update_refines_verb() {
        let c = Classifier::new();
        let out = c.classify(&update_touching("issues", "status"));
        assert_eq!(out.event.event_type, "issue.status_changed");
    }

    #[test]
    fn test_assignee_update_refines_verb() {
        let c = Classifier::new();
        let out = c.classify(&update_touching("issues", "assignee"));
        assert_eq!(out.event.event_type, "issue.assigned");
    }

    #[test]
    fn test_project_archive_refines_verb() {
        let c = Classifier::new();
        let out = c.classify(&update_touching("projects", "archived"));
        assert_eq!(out.event.event_type, "project.archived");
    }

    #[test]
    fn test_plain_update_stays_updated() {
        let c = Classifier::new();
        let out = c.classify(&update_touching("issues", "title"));
        assert_eq!(out.event.event_type, "issue.updated");
    }

    #[test]
    fn test_delete_classifies_as_deleted() {
        let c = Classifier::new();
        let out = c.classify(&record("projects", Operation::Delete));
        assert_eq!(out.event.event_type, "project.deleted");
    }

    #[test]
    fn test_unknown_collection_is_generic_low_priority() {
        let c = Classifier::new();
        let out = c.classify(&record("workspaces", Operation::Insert));
        assert_eq!(out.event.event_type, "workspaces.created");
        assert_eq!(out.kind, EntityKind::Generic("workspaces".to_string()));
        assert_eq!(out.priority, Priority::Low);
    }

    #[test]
    fn test_status_wins_over_assignee() {
        let c = Classifier::new();
        let mut rec = record("issues", Operation::Update);
        let mut desc = UpdateDescription::default();
        desc.updated_fields.insert("status".to_string(), json!("done"));
        desc.updated_fields.insert("assignee".to_string(), json!("u1"));
        rec.update_description = Some(desc);

        assert_eq!(c.classify(&rec).event.event_type, "issue.status_changed");
    }

    #[test]
    fn test_priority_ordinals() {
        assert_eq!(Priority::High.ordinal(), 1);
        assert_eq!(Priority::Medium.ordinal(), 2);
        assert_eq!(Priority::Low.ordinal(), 3);
    }

    #[test]
    fn test_catalog_contains_expected_types() {
        let catalog = Classifier::event_type_catalog();
        assert!(catalog.contains(&"issue.created".to_string()));
        assert!(catalog.contains(&"issue.status_changed".to_string()));
        assert!(catalog.contains(&"issue.assigned".to_string()));
        assert!(catalog.contains(&"project.archived".to_string()));
        assert!(catalog.contains(&"comment.added".to_string()));
        assert!(!catalog.contains(&"comment.status_changed".to_string()));
    }
}
