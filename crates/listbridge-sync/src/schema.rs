//! Bug-board coding tables
//!
//! Each table pairs a tracker label with the list select value that stands
//! for it. A table is read in both directions, so every label and every
//! value must appear exactly once.

use listbridge_core::LogicalKey;

/// One enumerated field's (tracker label, list value) pairs.
#[derive(Debug)]
pub struct CodingTable {
    pub key: LogicalKey,
    pairs: &'static [(&'static str, &'static str)],
}

impl CodingTable {
    /// List value for a tracker label.
    pub fn to_list(&self, label: &str) -> Option<&'static str> {
        self.pairs.iter().find(|(l, _)| *l == label).map(|(_, v)| *v)
    }

    /// Tracker label for a list value.
    pub fn to_tracker(&self, value: &str) -> Option<&'static str> {
        self.pairs.iter().find(|(_, v)| *v == value).map(|(l, _)| *l)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.pairs.iter().map(|(l, _)| *l)
    }

    pub fn values(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.pairs.iter().map(|(_, v)| *v)
    }
}

/// Section name ↔ status value.
pub static STATUS: CodingTable = CodingTable {
    key: LogicalKey::Status,
    pairs: &[
        ("Important Info", "important_info"),
        ("Open Bugs", "open_bugs"),
        ("In Progress", "in_progress"),
        ("Regression", "regression"),
        ("Fixed", "fixed"),
        ("Closed", "closed"),
        ("Needs More Info", "needs_more_info"),
        ("Community Reports", "community_reports"),
    ],
};

pub static BUG_CATEGORY: CodingTable = CodingTable {
    key: LogicalKey::BugCategory,
    pairs: &[
        ("Code", "code"),
        ("Level Design", "level_design"),
        ("Game Design", "game_design"),
        ("Visual Art", "visual_art"),
        ("Audio", "audio"),
        ("Text", "text"),
        ("First-Party Requirement", "first_party"),
    ],
};

const LEVELS: &[(&str, &str)] = &[
    ("Low", "low"),
    ("Medium", "medium"),
    ("High", "high"),
    ("Critical", "critical"),
];

pub static PRIORITY: CodingTable = CodingTable {
    key: LogicalKey::Priority,
    pairs: LEVELS,
};

pub static SEVERITY: CodingTable = CodingTable {
    key: LogicalKey::Severity,
    pairs: LEVELS,
};

pub static REPRO_RATE: CodingTable = CodingTable {
    key: LogicalKey::ReproRate,
    pairs: &[
        ("100%", "100"),
        ("75%", "75"),
        ("50%", "50"),
        ("25% and less", "25"),
    ],
};

pub static PLATFORM: CodingTable = CodingTable {
    key: LogicalKey::Platform,
    pairs: &[
        ("PC (Steam, GOG, Epic)", "pc"),
        ("Xbox One", "xbox_one"),
        ("Xbox Series", "xbox_series"),
        ("PS4", "ps4"),
        ("PS5", "ps5"),
        ("Switch", "switch"),
        ("VR", "vr"),
    ],
};

pub static REGRESSION_STATUS: CodingTable = CodingTable {
    key: LogicalKey::RegressionStatus,
    pairs: &[
        ("Bug fixed", "bug_fixed"),
        ("Bug still occurs", "bug_still_occurs"),
    ],
};

/// Tables for tracker enum custom fields. Status is separate: it comes from
/// section membership, not a custom field.
pub static ENUM_TABLES: [&CodingTable; 6] = [
    &BUG_CATEGORY,
    &PRIORITY,
    &SEVERITY,
    &REPRO_RATE,
    &PLATFORM,
    &REGRESSION_STATUS,
];

pub fn table_for(key: LogicalKey) -> Option<&'static CodingTable> {
    if key == LogicalKey::Status {
        return Some(&STATUS);
    }
    ENUM_TABLES.iter().copied().find(|t| t.key == key)
}
