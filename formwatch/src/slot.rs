//! Catalog of monitorable time slots.

/// A class time slot the form can be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub id: &'static str,
    pub label: &'static str,
    pub day: &'static str,
}

pub const SLOTS: &[SlotConfig] = &[
    SlotConfig {
        id: "tue_930",
        label: "9:30 - 11:10 AM",
        day: "Tuesday",
    },
    SlotConfig {
        id: "fri_1110",
        label: "11:10 AM - 12:50 PM",
        day: "Friday",
    },
    SlotConfig {
        id: "tue_140",
        label: "1:40 - 3:20 PM",
        day: "Tuesday",
    },
    SlotConfig {
        id: "tue_1110",
        label: "11:10 AM - 12:50 PM",
        day: "Tuesday",
    },
];

/// Look up a slot by id.
pub fn find(id: &str) -> Option<&'static SlotConfig> {
    SLOTS.iter().find(|slot| slot.id == id)
}

impl SlotConfig {
    /// Human-readable description, e.g. "Tuesday 9:30 - 11:10 AM".
    pub fn describe(&self) -> String {
        format!("{} {}", self.day, self.label)
    }
}
