//! Persisted switch-state table.
//!
//! The controller remembers, across process restarts, which contact was
//! last driven to which polarity on every port of every board it has talked
//! to. The table lives in a flat JSON file keyed by board serial number:
//!
//! ```json
//! {
//!     "SN": { "port_A": { "contact_1": 0, ... }, ... },
//!     "QX0001": { "port_A": { "contact_1": 1, ... }, ... }
//! }
//! ```
//!
//! The `"SN"` entry is the all-disconnected template seeded for boards seen
//! for the first time. Updates are whole-file read-modify-write cycles with
//! no lock; concurrent writers from separate processes can lose updates,
//! which is accepted for the single-operator lab setting this targets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::board::Port;
use crate::error::Result;

/// Key used for the template entry.
const TEMPLATE_KEY: &str = "SN";

/// Contacts of one port, keyed `contact_<n>`.
pub type PortContacts = BTreeMap<String, u8>;

/// Ports of one board, keyed `port_<letter>`.
pub type BoardState = BTreeMap<String, PortContacts>;

type StatesFile = BTreeMap<String, BoardState>;

/// Handle on the `states.json` store.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All-disconnected state for a fresh board.
    fn template() -> BoardState {
        let mut board = BoardState::new();
        for port in Port::ALL {
            let mut contacts = PortContacts::new();
            for contact in 1..=6 {
                contacts.insert(format!("contact_{contact}"), 0);
            }
            board.insert(format!("port_{port}"), contacts);
        }
        board
    }

    fn load(&self) -> Result<StatesFile> {
        if !self.path.exists() {
            let mut states = StatesFile::new();
            states.insert(TEMPLATE_KEY.to_string(), Self::template());
            return Ok(states);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn store(&self, states: &StatesFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(states)?)?;
        Ok(())
    }

    /// Seed a record for a board on first contact.
    pub fn ensure_board(&self, serial_number: &str) -> Result<()> {
        let mut states = self.load()?;
        if !states.contains_key(serial_number) {
            let template = states
                .get(TEMPLATE_KEY)
                .cloned()
                .unwrap_or_else(Self::template);
            states.insert(serial_number.to_string(), template);
            self.store(&states)?;
        }
        Ok(())
    }

    /// Record the polarity last driven on (board, port, contact).
    pub fn record(&self, serial_number: &str, port: Port, contact: u8, polarity: bool) -> Result<()> {
        let mut states = self.load()?;
        let board = states
            .entry(serial_number.to_string())
            .or_insert_with(Self::template);
        board
            .entry(format!("port_{port}"))
            .or_default()
            .insert(format!("contact_{contact}"), polarity as u8);
        self.store(&states)
    }

    /// Last-known state of one board, if it has ever been seen.
    pub fn board_state(&self, serial_number: &str) -> Result<Option<BoardState>> {
        Ok(self.load()?.get(serial_number).cloned())
    }

    /// Polarity last recorded for one contact (0 when never driven).
    pub fn contact_state(&self, serial_number: &str, port: Port, contact: u8) -> Result<u8> {
        Ok(self
            .board_state(serial_number)?
            .and_then(|b| b.get(&format!("port_{port}")).cloned())
            .and_then(|p| p.get(&format!("contact_{contact}")).copied())
            .unwrap_or(0))
    }
}

/// Render the interactive ASCII diagram for one port.
///
/// Connected contacts are drawn joined to the common rail:
///
/// ```text
/// 1 ----┐
/// 2 -  -│
/// ...
///       └- COM
/// ```
pub fn render_port_diagram(board: &BoardState, port: Port) -> String {
    let key = format!("port_{port}");
    let empty = PortContacts::new();
    let contacts = board.get(&key).unwrap_or(&empty);
    let mut out = format!("Port {port} state\n");
    for contact in 1..=6u8 {
        let connected = contacts
            .get(&format!("contact_{contact}"))
            .copied()
            .unwrap_or(0)
            != 0;
        if connected {
            if contact == 1 {
                out.push_str(&format!("{contact} ----\u{2510}\n"));
            } else {
                out.push_str(&format!("{contact} ----\u{2524}\n"));
            }
        } else {
            out.push_str(&format!("{contact} -  -\u{2502}\n"));
        }
    }
    out.push_str("      \u{2514}- COM\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("states.json"))
    }

    #[test]
    fn first_contact_seeds_from_template() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.ensure_board("QX0042").unwrap();

        let board = store.board_state("QX0042").unwrap().unwrap();
        assert_eq!(board.len(), 4);
        assert_eq!(board["port_A"]["contact_1"], 0);
        // The template entry itself is persisted too.
        assert!(store.board_state("SN").unwrap().is_some());
    }

    #[test]
    fn record_updates_one_leaf() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.record("QX0042", Port::A, 3, true).unwrap();

        assert_eq!(store.contact_state("QX0042", Port::A, 3).unwrap(), 1);
        assert_eq!(store.contact_state("QX0042", Port::A, 2).unwrap(), 0);
        assert_eq!(store.contact_state("QX0042", Port::B, 3).unwrap(), 0);
    }

    #[test]
    fn record_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.record("QX0042", Port::A, 3, true).unwrap();
        store.record("QX0042", Port::A, 3, true).unwrap();
        assert_eq!(store.contact_state("QX0042", Port::A, 3).unwrap(), 1);

        store.record("QX0042", Port::A, 3, false).unwrap();
        assert_eq!(store.contact_state("QX0042", Port::A, 3).unwrap(), 0);
    }

    #[test]
    fn diagram_marks_connected_contacts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.record("QX0042", Port::A, 1, true).unwrap();
        store.record("QX0042", Port::A, 4, true).unwrap();

        let board = store.board_state("QX0042").unwrap().unwrap();
        let diagram = render_port_diagram(&board, Port::A);
        assert!(diagram.contains("1 ----\u{2510}"));
        assert!(diagram.contains("4 ----\u{2524}"));
        assert!(diagram.contains("2 -  -\u{2502}"));
        assert!(diagram.contains("\u{2514}- COM"));
    }
}
