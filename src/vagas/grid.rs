//! Occupancy grid model and text rendering

use crate::api::MapaResponse;

/// Columns used when a snapshot reports none
const DEFAULT_COLS: usize = 5;

/// Occupancy of a single slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Occupied; the plate is missing when the backend has no vehicle link
    Occupied { plate: Option<String> },
}

/// A named parking slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: i64,
    /// Box name, or `BOX {id}` when unnamed
    pub label: String,
    pub state: SlotState,
}

impl Slot {
    pub fn is_occupied(&self) -> bool {
        matches!(self.state, SlotState::Occupied { .. })
    }

    /// Plate if known, otherwise a status word
    pub fn display_value(&self) -> &str {
        match &self.state {
            SlotState::Free => "FREE",
            SlotState::Occupied { plate: Some(plate) } => plate.as_str(),
            SlotState::Occupied { plate: None } => "OCCUPIED",
        }
    }

    /// Match by numeric id or by name, ignoring case
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        !key.is_empty() && (self.id.to_string() == key || self.label.eq_ignore_ascii_case(key))
    }
}

/// Slot map rebuilt from a single snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyGrid {
    pub rows: u32,
    pub cols: u32,
    pub slots: Vec<Slot>,
}

impl OccupancyGrid {
    /// Build a grid from a snapshot. Nothing carries over from earlier snapshots.
    pub fn from_snapshot(snapshot: &MapaResponse) -> Self {
        let slots = snapshot
            .boxes
            .iter()
            .map(|item| {
                let b = &item.slot;
                let label = if b.nome.trim().is_empty() {
                    format!("BOX {}", b.id_box)
                } else {
                    b.nome.trim().to_string()
                };
                let state = if b.status.trim().eq_ignore_ascii_case("O") {
                    SlotState::Occupied {
                        plate: item
                            .placa
                            .as_deref()
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_string),
                    }
                } else {
                    SlotState::Free
                };
                Slot {
                    id: b.id_box,
                    label,
                    state,
                }
            })
            .collect();

        Self {
            rows: snapshot.rows,
            cols: snapshot.cols,
            slots,
        }
    }

    /// Slot by name (case-insensitive)
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.label.eq_ignore_ascii_case(name.trim()))
    }

    pub fn slot_by_id(&self, id: i64) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Slot currently holding `plate`
    pub fn find_plate(&self, plate: &str) -> Option<&Slot> {
        let plate = plate.trim();
        self.slots.iter().find(|s| match &s.state {
            SlotState::Occupied { plate: Some(p) } => p.eq_ignore_ascii_case(plate),
            _ => false,
        })
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn free_count(&self) -> usize {
        self.slots.len() - self.occupied_count()
    }

    /// Render the board as text, `cols` cells per line. A highlighted slot
    /// (id or name) is wrapped in `*`.
    pub fn render(&self, highlight: Option<&str>) -> String {
        let cols = if self.cols == 0 {
            DEFAULT_COLS
        } else {
            self.cols as usize
        };

        let cells: Vec<String> = self
            .slots
            .iter()
            .map(|slot| {
                let cell = format!("{} {}", slot.label, slot.display_value());
                if highlight.map(|key| slot.matches(key)).unwrap_or(false) {
                    format!("*{}*", cell)
                } else {
                    format!(" {} ", cell)
                }
            })
            .collect();
        let width = cells.iter().map(|c| c.chars().count()).max().unwrap_or(0);

        let mut out = format!(
            "Occupied {}/{} ({}x{})\n",
            self.occupied_count(),
            self.slots.len(),
            self.rows,
            self.cols
        );
        for row in cells.chunks(cols) {
            let line: Vec<String> = row
                .iter()
                .map(|cell| format!("[{:<width$}]", cell, width = width))
                .collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}
