use serde_json::Value as JsonValue;

use eventmill_core::ExpectedVersion;
use eventmill_events::{Event, MetadataMatcher};

use crate::document_store::WriteOptions;

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    AppendTo {
        stream: String,
        events: Vec<Event>,
        matcher: Option<MetadataMatcher>,
        expected_version: ExpectedVersion,
    },
    DeleteEvents {
        stream: String,
        matcher: MetadataMatcher,
    },
    AddDoc {
        collection: String,
        id: String,
        body: JsonValue,
        options: WriteOptions,
    },
    UpdateDoc {
        collection: String,
        id: String,
        partial: JsonValue,
        options: WriteOptions,
    },
    UpsertDoc {
        collection: String,
        id: String,
        body: JsonValue,
        options: WriteOptions,
    },
    ReplaceDoc {
        collection: String,
        id: String,
        body: JsonValue,
        options: WriteOptions,
    },
    /// Create or overwrite with an explicit version (aggregate snapshots).
    SetDoc {
        collection: String,
        id: String,
        body: JsonValue,
        version: u64,
    },
    DeleteDoc {
        collection: String,
        id: String,
    },
}

/// Ordered list of writes committed atomically by a
/// [`UnitOfWork`](super::UnitOfWork).
///
/// Operations apply in insertion order, so a later op observes the effects of
/// earlier ones (e.g. an `UpdateDoc` after an `AddDoc` of the same id).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn append_to(
        &mut self,
        stream: impl Into<String>,
        events: Vec<Event>,
        matcher: Option<MetadataMatcher>,
        expected_version: ExpectedVersion,
    ) -> &mut Self {
        self.push(WriteOp::AppendTo { stream: stream.into(), events, matcher, expected_version })
    }

    pub fn delete_events(&mut self, stream: impl Into<String>, matcher: MetadataMatcher) -> &mut Self {
        self.push(WriteOp::DeleteEvents { stream: stream.into(), matcher })
    }

    pub fn add_doc(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        body: JsonValue,
        options: WriteOptions,
    ) -> &mut Self {
        self.push(WriteOp::AddDoc { collection: collection.into(), id: id.into(), body, options })
    }

    pub fn update_doc(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        partial: JsonValue,
        options: WriteOptions,
    ) -> &mut Self {
        self.push(WriteOp::UpdateDoc { collection: collection.into(), id: id.into(), partial, options })
    }

    pub fn upsert_doc(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        body: JsonValue,
        options: WriteOptions,
    ) -> &mut Self {
        self.push(WriteOp::UpsertDoc { collection: collection.into(), id: id.into(), body, options })
    }

    pub fn replace_doc(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        body: JsonValue,
        options: WriteOptions,
    ) -> &mut Self {
        self.push(WriteOp::ReplaceDoc { collection: collection.into(), id: id.into(), body, options })
    }

    pub fn set_doc(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        body: JsonValue,
        version: u64,
    ) -> &mut Self {
        self.push(WriteOp::SetDoc { collection: collection.into(), id: id.into(), body, version })
    }

    pub fn delete_doc(&mut self, collection: impl Into<String>, id: impl Into<String>) -> &mut Self {
        self.push(WriteOp::DeleteDoc { collection: collection.into(), id: id.into() })
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every `(stream, events)` pair this batch appends, in order.
    pub fn appended(&self) -> impl Iterator<Item = (&str, &[Event])> {
        self.ops.iter().filter_map(|op| match op {
            WriteOp::AppendTo { stream, events, .. } => Some((stream.as_str(), events.as_slice())),
            _ => None,
        })
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
