use std::collections::HashMap;

/// Ordered `key=value` pairs of a block. Keys keep their leading `|` and are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` lines; later duplicates overwrite earlier values in place.
    /// `| key` is normalized to `|key`.
    pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut fields = Self::new();
        for line in lines {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(normalize_key(key), value.trim());
            }
        }
        fields
    }

    /// Parse the body of a `{{Header\n...\n}}` block, skipping its first and last line.
    pub fn parse_block(block: &str) -> Self {
        let lines = block.split('\n').collect::<Vec<_>>();
        if lines.len() < 2 {
            return Self::new();
        }
        Self::parse_lines(lines[1..lines.len() - 1].iter().copied())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn rename_keys(&mut self, mut rename: impl FnMut(&str) -> Option<String>) {
        let mut renamed = Self::new();
        for (key, value) in self.entries.drain(..) {
            let key = rename(&key).unwrap_or(key);
            renamed.insert(key, value);
        }
        *self = renamed;
    }
}

fn normalize_key(raw: &str) -> String {
    let key = raw.trim();
    match key.strip_prefix('|') {
        Some(name) => format!("|{}", name.trim_start()),
        None => key.to_string(),
    }
}

/// Predicate deciding whether a field key is curated on the wiki for a given identifier.
pub type ProtectFn = fn(key: &str, identifier: Option<&str>) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    pub protect: ProtectFn,
    /// Retain non-protected page keys that the fragment does not carry.
    pub keep_unmatched: bool,
}

impl MergePolicy {
    pub fn replace_all() -> Self {
        Self {
            protect: protect_nothing,
            keep_unmatched: false,
        }
    }
}

pub fn protect_nothing(_key: &str, _identifier: Option<&str>) -> bool {
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub fields: FieldMap,
    pub changed: bool,
}

/// Merge fragment fields over page fields, keeping protected page values verbatim.
pub fn merge(
    original: &FieldMap,
    fragment: &FieldMap,
    policy: &MergePolicy,
    identifier: Option<&str>,
) -> MergeOutcome {
    let is_protected = |key: &str| (policy.protect)(key, identifier);
    let mut fields = FieldMap::new();
    let mut changed = false;

    for (key, value) in original.iter() {
        if is_protected(key) || (policy.keep_unmatched && !fragment.contains_key(key)) {
            fields.insert(key, value);
        }
    }

    for (key, value) in fragment.iter() {
        if is_protected(key) {
            continue;
        }
        if original.get(key) != Some(value) {
            changed = true;
        }
        fields.insert(key, value);
    }

    if fields.len() != original.len() {
        changed = true;
    }

    MergeOutcome { fields, changed }
}

/// Field-key serialization order. Keys missing from the table sort after all listed keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl SortOrder {
    pub fn new<S: AsRef<str>>(keys: &[S]) -> Self {
        let mut index = HashMap::with_capacity(keys.len());
        let mut ordered = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref().to_string();
            if index.contains_key(&key) {
                continue;
            }
            index.insert(key.clone(), ordered.len());
            ordered.push(key);
        }
        Self {
            keys: ordered,
            index,
        }
    }

    pub fn rank(&self, key: &str) -> usize {
        self.index.get(key).copied().unwrap_or(self.keys.len())
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Serialize fields as `{{header\n|k=v\n...\n}}` ordered by `order`, stable for ties.
pub fn rebuild(header: &str, fields: &FieldMap, order: &SortOrder) -> String {
    let mut lines = fields.iter().collect::<Vec<_>>();
    lines.sort_by_key(|(key, _)| order.rank(key));

    let mut block = format!("{{{{{header}\n");
    for (key, value) in lines {
        block.push_str(key);
        block.push('=');
        block.push_str(value);
        block.push('\n');
    }
    block.push_str("}}");
    block
}
