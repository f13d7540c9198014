//! ---
//! dl_section: "01-data-primitives"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Name-value collections shared between drivers and remote services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single named string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

/// Ordered list of (name, value) string pairs.
///
/// Lookups return the first entry with a matching name. Entries are
/// immutable once pushed; derived configurations are built by cloning and
/// extending a copy. Equality is order-independent: two lists are equal when
/// they have the same cardinality and every entry finds a same-named entry
/// with an equal value in the other list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameValueList {
    entries: Vec<NameValuePair>,
}

impl NameValueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(NameValuePair {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value recorded under `name`, if any.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }

    /// Signed integer accessor. Fails unless the whole string parses.
    pub fn int_value(&self, name: &str) -> Option<i64> {
        self.value(name)?.parse().ok()
    }

    /// Unsigned integer accessor. Fails unless the whole string parses.
    pub fn uint_value(&self, name: &str) -> Option<u64> {
        self.value(name)?.parse().ok()
    }

    /// Floating point accessor. Fails unless the whole string parses.
    pub fn float_value(&self, name: &str) -> Option<f64> {
        self.value(name)?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NameValuePair> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for NameValueList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| NameValuePair { name, value })
                .collect(),
        }
    }
}

impl PartialEq for NameValueList {
    fn eq(&self, other: &Self) -> bool {
        keyed_lists_equal(
            &self.entries,
            &other.entries,
            |pair| &pair.name,
            |a, b| a.value == b.value,
        )
    }
}

impl Eq for NameValueList {}

/// A named protocol group: protocol name plus its property list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub properties: NameValueList,
}

/// Named groups of [`NameValueList`], keyed by protocol name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolCatalog {
    protocols: Vec<Protocol>,
}

impl ProtocolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, properties: NameValueList) {
        self.protocols.push(Protocol {
            name: name.into(),
            properties,
        });
    }

    /// Properties of the first protocol recorded under `name`, if any.
    pub fn properties(&self, name: &str) -> Option<&NameValueList> {
        self.protocols
            .iter()
            .find(|protocol| protocol.name == name)
            .map(|protocol| &protocol.properties)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl PartialEq for ProtocolCatalog {
    fn eq(&self, other: &Self) -> bool {
        keyed_lists_equal(
            &self.protocols,
            &other.protocols,
            |protocol| &protocol.name,
            |a, b| a.properties == b.properties,
        )
    }
}

impl Eq for ProtocolCatalog {}

/// A periodic read instruction attached to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoEvent {
    /// Device resource to read.
    pub resource: String,
    /// Poll interval, e.g. "10s".
    pub frequency: String,
    /// Suppress posting when the value is unchanged.
    #[serde(default)]
    pub on_change: bool,
}

/// Ordered list of [`AutoEvent`] entries, keyed by resource name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoEventList {
    events: Vec<AutoEvent>,
}

impl AutoEventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AutoEvent) {
        self.events.push(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AutoEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<AutoEvent>> for AutoEventList {
    fn from(events: Vec<AutoEvent>) -> Self {
        Self { events }
    }
}

impl PartialEq for AutoEventList {
    fn eq(&self, other: &Self) -> bool {
        keyed_lists_equal(
            &self.events,
            &other.events,
            |event| &event.resource,
            |a, b| a.frequency == b.frequency && a.on_change == b.on_change,
        )
    }
}

impl Eq for AutoEventList {}

/// Order-independent equality for keyed entry lists.
///
/// Two lists are equal when they have the same cardinality and every entry
/// on the left matches the first same-keyed entry on the right under
/// `values_equal`. The right side is indexed by key so comparison is linear
/// rather than pairwise.
pub fn keyed_lists_equal<T>(
    left: &[T],
    right: &[T],
    key: impl Fn(&T) -> &str,
    values_equal: impl Fn(&T, &T) -> bool,
) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut index: IndexMap<&str, &T> = IndexMap::with_capacity(right.len());
    for entry in right {
        // First entry wins so duplicate keys keep first-match semantics.
        index.entry(key(entry)).or_insert(entry);
    }
    left.iter().all(|entry| {
        index
            .get(key(entry))
            .is_some_and(|found| values_equal(entry, found))
    })
}
