use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    Create,
    Update,
    Delete,
    Schema,
    Join,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Read => "read",
            StatementKind::Create => "create",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Schema => "schema",
            StatementKind::Join => "join",
        }
    }

    /// Only reads and joins carry a table alias; the dialect rejects them in
    /// UPDATE and DELETE.
    pub fn allows_alias(&self) -> bool {
        matches!(self, StatementKind::Read | StatementKind::Join)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named placeholder in a statement template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Limit,
    Fields,
    Source,
    Joins,
    Conditions,
    Group,
    Order,
    Comment,
    Values,
    Data,
    Flags,
    Aliases,
    Columns,
    Indexes,
    Type,
    Constraint,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Limit => "limit",
            Slot::Fields => "fields",
            Slot::Source => "source",
            Slot::Joins => "joins",
            Slot::Conditions => "conditions",
            Slot::Group => "group",
            Slot::Order => "order",
            Slot::Comment => "comment",
            Slot::Values => "values",
            Slot::Data => "data",
            Slot::Flags => "flags",
            Slot::Aliases => "aliases",
            Slot::Columns => "columns",
            Slot::Indexes => "indexes",
            Slot::Type => "type",
            Slot::Constraint => "constraint",
        }
    }

    pub fn from_name(name: &str) -> Option<Slot> {
        Some(match name {
            "limit" => Slot::Limit,
            "fields" => Slot::Fields,
            "source" => Slot::Source,
            "joins" => Slot::Joins,
            "conditions" => Slot::Conditions,
            "group" => Slot::Group,
            "order" => Slot::Order,
            "comment" => Slot::Comment,
            "values" => Slot::Values,
            "data" => Slot::Data,
            "flags" => Slot::Flags,
            "aliases" => Slot::Aliases,
            "columns" => Slot::Columns,
            "indexes" => Slot::Indexes,
            "type" => Slot::Type,
            "constraint" => Slot::Constraint,
            _ => return None,
        })
    }
}

/// Requested row window. `offset` only matters when `limit` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Page {
    pub fn new(limit: Option<u64>, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// A zero limit means no limit.
    pub fn limit(&self) -> Option<u64> {
        self.limit.filter(|n| *n > 0)
    }

    /// Paging past the first rows needs the row-numbering form.
    pub fn needs_row_numbers(&self) -> bool {
        self.limit().is_some() && self.offset > 0
    }

    /// 1-based inclusive row-number range covered by this page.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        self.limit()
            .map(|n| (self.offset.saturating_add(1), self.offset.saturating_add(n)))
    }
}

/// Rendered fragments for one statement. Built once, then handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    kind: StatementKind,
    slots: BTreeMap<Slot, String>,
    page: Page,
}

impl QueryDescriptor {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            slots: BTreeMap::new(),
            page: Page::default(),
        }
    }

    /// Set a slot. Empty fragments are ignored.
    pub fn with(mut self, slot: Slot, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        if !fragment.trim().is_empty() {
            self.slots.insert(slot, fragment);
        }
        self
    }

    pub fn with_opt(self, slot: Slot, fragment: Option<String>) -> Self {
        match fragment {
            Some(fragment) => self.with(slot, fragment),
            None => self,
        }
    }

    pub fn paged(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.slots.get(&slot).map(String::as_str)
    }
}
