//! Metadata Domain Models
//!
//! Records are semi-structured: a map of field name → [`FieldValue`], where
//! every value is classified once, at construction, as either a single
//! [`Scalar`] or a list of scalars. Nothing downstream inspects shapes at
//! runtime.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Well-known field names
pub mod fields {
    pub const ID: &str = "id";
    pub const LABELS: &str = "labels";
    pub const FLAGS: &str = "flags";
    pub const THREAD_ID: &str = "thread_id";
    pub const INTERNAL_DATE: &str = "internal_date";
    pub const SUBJECT: &str = "subject";
    pub const MESSAGE_ID: &str = "message_id";

    /// Derived on bury from the placement hint
    pub const CATEGORY: &str = "category";
    /// Derived on bury from the placement hint
    pub const LOCATION: &str = "location";

    /// Fields whose values the store computes and overwrites
    pub const DERIVED: [&str; 2] = [CATEGORY, LOCATION];
}

/// Record envelope version written by this crate
pub const RECORD_VERSION: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════

/// Stable 64-bit message identifier (Gmail `X-GM-MSGID`)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Values
// ═══════════════════════════════════════════════════════════════════════════

/// A single indexable value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Text(String),
    Integer(i64),
    /// Stored with second precision
    Timestamp(#[serde(with = "chrono::serde::ts_seconds")] DateTime<Utc>),
}

impl Scalar {
    /// Storage form used by the secondary index
    pub fn index_value(&self) -> IndexValue {
        match self {
            Scalar::Text(s) => IndexValue::Text(s.clone()),
            Scalar::Integer(i) => IndexValue::Integer(*i),
            Scalar::Timestamp(ts) => IndexValue::Integer(ts.timestamp()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Seconds since the epoch for timestamps and plain integers
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Scalar::Timestamp(ts) => Some(*ts),
            Scalar::Integer(secs) => DateTime::from_timestamp(*secs, 0),
            Scalar::Text(_) => None,
        }
    }

    /// Drop sub-second precision from timestamps
    fn whole_seconds(self) -> Self {
        match self {
            Scalar::Timestamp(ts) => Scalar::Timestamp(truncate_to_seconds(ts)),
            other => other,
        }
    }
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Integer(i)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(ts: DateTime<Utc>) -> Self {
        Scalar::Timestamp(truncate_to_seconds(ts))
    }
}

/// Value as stored in an index row.
///
/// Variant order matches SQLite's cross-type ordering (INTEGER < TEXT), so
/// both backends sort rows identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Integer(i64),
    Text(String),
}

impl IndexValue {
    pub(crate) fn same_class(&self, other: &IndexValue) -> bool {
        matches!(
            (self, other),
            (IndexValue::Integer(_), IndexValue::Integer(_)) | (IndexValue::Text(_), IndexValue::Text(_))
        )
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Integer(i) => write!(f, "{}", i),
            IndexValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Field value: a scalar, or an ordered collection of scalars.
///
/// A string is always a scalar; it is never treated as a sequence of
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Scalar(Scalar::Text(s.into()))
    }

    pub fn integer(i: i64) -> Self {
        FieldValue::Scalar(Scalar::Integer(i))
    }

    /// Timestamps are kept with second precision
    pub fn timestamp(ts: DateTime<Utc>) -> Self {
        FieldValue::Scalar(Scalar::Timestamp(truncate_to_seconds(ts)))
    }

    /// List of text values (labels, flags)
    pub fn text_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::List(items.into_iter().map(|s| Scalar::Text(s.into())).collect())
    }

    fn whole_seconds(self) -> Self {
        match self {
            FieldValue::Scalar(s) => FieldValue::Scalar(s.whole_seconds()),
            FieldValue::List(items) => {
                FieldValue::List(items.into_iter().map(Scalar::whole_seconds).collect())
            }
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            FieldValue::List(items) => Some(items),
            FieldValue::Scalar(_) => None,
        }
    }

    /// Classify a JSON value at the ingestion boundary
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Option<Self>> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(None),
            Value::Array(items) => items
                .iter()
                .map(|item| scalar_from_json(name, item))
                .collect::<Result<Vec<_>>>()
                .map(|items| Some(FieldValue::List(items))),
            other => scalar_from_json(name, other).map(|s| Some(FieldValue::Scalar(s))),
        }
    }

    /// Plain JSON form (timestamps as epoch seconds)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Scalar(s) => scalar_to_json(s),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(scalar_to_json).collect())
            }
        }
    }
}

fn scalar_from_json(name: &str, value: &serde_json::Value) -> Result<Scalar> {
    use serde_json::Value;

    match value {
        Value::String(s) => Ok(Scalar::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(Scalar::Integer).ok_or_else(|| {
            StorageError::malformed(format!(
                "Field '{}': number {} is not a 64-bit signed integer",
                name, n
            ))
        }),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(
            StorageError::malformed(format!("Field '{}': unindexable value {}", name, value)),
        ),
    }
}

fn scalar_to_json(scalar: &Scalar) -> serde_json::Value {
    match scalar {
        Scalar::Text(s) => serde_json::Value::from(s.as_str()),
        Scalar::Integer(i) => serde_json::Value::from(*i),
        Scalar::Timestamp(ts) => serde_json::Value::from(ts.timestamp()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Record
// ═══════════════════════════════════════════════════════════════════════════

/// Semi-structured message metadata keyed by `id`
///
/// # Examples
///
/// ```rust
/// use mailvault_meta::domain::{FieldValue, MessageId, Record};
///
/// let record = Record::new(MessageId(1412679471642059988))
///     .with("labels", FieldValue::text_list(["\\Inbox", "Perso/Foo"]))
///     .with("subject", FieldValue::text("Re: some subject"));
///
/// assert_eq!(record.id().unwrap(), MessageId(1412679471642059988));
/// assert_eq!(record.text("subject"), Some("Re: some subject"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    fields: &'a BTreeMap<String, FieldValue>,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a record holding only its identifier
    pub fn new(id: MessageId) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(fields::ID.to_string(), FieldValue::integer(id.get()));
        Self { fields }
    }

    /// Build from a JSON object, classifying every member once.
    ///
    /// `null` members are treated as absent.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| StorageError::malformed("Record must be a JSON object"))?;

        let mut record = Record::default();
        for (name, raw) in object {
            if let Some(field) = FieldValue::from_json(name, raw)? {
                record.insert(name.clone(), field);
            }
        }
        record.id()?;
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// The record identifier; `MalformedRecord` if missing or not an integer
    pub fn id(&self) -> Result<MessageId> {
        match self.fields.get(fields::ID) {
            Some(FieldValue::Scalar(Scalar::Integer(id))) => Ok(MessageId(*id)),
            Some(other) => Err(StorageError::malformed(format!(
                "Field 'id' must be an integer, got {:?}",
                other
            ))),
            None => Err(StorageError::malformed("Record is missing required field 'id'")),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a field; timestamps are truncated to whole seconds
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.whole_seconds())
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_scalar()?.as_text()
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_scalar()?.as_integer()
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name)?.as_scalar()?.as_timestamp()
    }

    pub fn list(&self, name: &str) -> Option<&[Scalar]> {
        self.get(name)?.as_list()
    }

    pub fn category(&self) -> Option<Category> {
        self.text(fields::CATEGORY)?.parse().ok()
    }

    pub fn location(&self) -> Option<&str> {
        self.text(fields::LOCATION)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy without the fields the store derives on bury
    pub fn without_derived(&self) -> Self {
        let mut copy = self.clone();
        for name in fields::DERIVED {
            copy.fields.remove(name);
        }
        copy
    }

    /// Serialize into the versioned JSON envelope kept by the record store
    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string(&EnvelopeRef {
            version: RECORD_VERSION,
            fields: &self.fields,
        })?)
    }

    pub fn from_blob(blob: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(blob)?;
        if envelope.version != RECORD_VERSION {
            return Err(StorageError::serialization(format!(
                "Unsupported record version {} (supported: {})",
                envelope.version, RECORD_VERSION
            )));
        }
        Ok(Self {
            fields: envelope.fields,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Typed ingestion
// ═══════════════════════════════════════════════════════════════════════════

/// Metadata as supplied by the mail-fetching collaborator
///
/// Accepts the legacy gmvault key names (`gm_id`, `thread_ids`, `msg_id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMetadata {
    #[serde(alias = "gm_id")]
    pub id: MessageId,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, alias = "thread_ids")]
    pub thread_id: Option<i64>,
    /// Seconds since the epoch
    #[serde(default)]
    pub internal_date: Option<i64>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "msg_id")]
    pub message_id: Option<String>,
    /// Additional fields beyond the well-known set.
    ///
    /// Any other JSON member lands here, classified like
    /// [`Record::from_json`]; timestamps serialize as epoch seconds.
    #[serde(
        flatten,
        deserialize_with = "classify_extra",
        serialize_with = "plain_extra"
    )]
    pub extra: BTreeMap<String, FieldValue>,
}

fn classify_extra<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, FieldValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    let mut extra = BTreeMap::new();
    for (name, value) in &raw {
        if let Some(field) = FieldValue::from_json(name, value).map_err(serde::de::Error::custom)? {
            extra.insert(name.clone(), field);
        }
    }
    Ok(extra)
}

fn plain_extra<S>(
    extra: &BTreeMap<String, FieldValue>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(extra.iter().map(|(name, value)| (name, value.to_json())))
}

impl MailMetadata {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn into_record(self) -> Result<Record> {
        let mut record = Record::new(self.id);
        for (name, value) in self.extra {
            record.insert(name, value);
        }
        record.insert(fields::LABELS, FieldValue::text_list(self.labels));
        record.insert(fields::FLAGS, FieldValue::text_list(self.flags));
        if let Some(thread_id) = self.thread_id {
            record.insert(fields::THREAD_ID, FieldValue::integer(thread_id));
        }
        if let Some(secs) = self.internal_date {
            let ts = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                StorageError::malformed(format!("internal_date out of range: {}", secs))
            })?;
            record.insert(fields::INTERNAL_DATE, FieldValue::timestamp(ts));
        }
        if let Some(subject) = self.subject {
            record.insert(fields::SUBJECT, FieldValue::text(subject));
        }
        if let Some(message_id) = self.message_id {
            record.insert(fields::MESSAGE_ID, FieldValue::text(message_id));
        }
        // The identifier always wins over a stray `id` in `extra`.
        record.insert(fields::ID, FieldValue::integer(self.id.get()));
        Ok(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Derived attributes
// ═══════════════════════════════════════════════════════════════════════════

/// Provenance classification of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Email,
    Chat,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Chat => "chat",
        }
    }
}

impl FromStr for Category {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "email" => Ok(Category::Email),
            "chat" => Ok(Category::Chat),
            _ => Err(StorageError::malformed(format!(
                "Unknown category '{}'. Valid categories: email, chat",
                s
            ))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied storage-area hint, e.g. `"2012-09"` or `"chats/2012-09"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Placement(pub String);

impl Placement {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Placement {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Index & Query
// ═══════════════════════════════════════════════════════════════════════════

/// One (record, field, emitted value) row of the secondary index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRow {
    pub id: MessageId,
    pub field: String,
    pub value: IndexValue,
}

/// Field registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedField {
    pub name: String,
    /// True between registration and completion of the backfill pass
    pub needs_backfill: bool,
}

/// Emitted index values per field, for one record
pub type EmittedValues = BTreeMap<String, Vec<IndexValue>>;

/// Scan predicate over a field's stored values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equals(Scalar),
    /// Inclusive bounds; values of another type than a bound never match
    Range {
        lo: Option<Scalar>,
        hi: Option<Scalar>,
    },
}

impl Predicate {
    pub fn equals(value: impl Into<Scalar>) -> Self {
        Predicate::Equals(value.into())
    }

    pub fn range(lo: impl Into<Scalar>, hi: impl Into<Scalar>) -> Self {
        Predicate::Range {
            lo: Some(lo.into()),
            hi: Some(hi.into()),
        }
    }

    pub fn at_least(lo: impl Into<Scalar>) -> Self {
        Predicate::Range {
            lo: Some(lo.into()),
            hi: None,
        }
    }

    pub fn at_most(hi: impl Into<Scalar>) -> Self {
        Predicate::Range {
            lo: None,
            hi: Some(hi.into()),
        }
    }

    /// Every stored value of the field
    pub fn any() -> Self {
        Predicate::Range { lo: None, hi: None }
    }

    pub fn matches(&self, value: &IndexValue) -> bool {
        match self {
            Predicate::Equals(expected) => expected.index_value() == *value,
            Predicate::Range { lo, hi } => {
                let above = lo.as_ref().map_or(true, |lo| {
                    let lo = lo.index_value();
                    lo.same_class(value) && *value >= lo
                });
                let below = hi.as_ref().map_or(true, |hi| {
                    let hi = hi.index_value();
                    hi.same_class(value) && *value <= hi
                });
                above && below
            }
        }
    }
}

/// A predicate bound to a field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPredicate {
    pub field: String,
    pub predicate: Predicate,
}

impl FieldPredicate {
    pub fn new(field: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            field: field.into(),
            predicate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Result ordering for `find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    Id(Direction),
    /// By the smallest indexed value of the field; records without one last
    Field { field: String, direction: Direction },
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy::Id(Direction::Asc)
    }
}

/// Options for `find` / `find_ids`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub order_by: OrderBy,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
