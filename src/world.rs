use std::collections::{BTreeMap, BTreeSet};

/// Host operations a script may trigger.
///
/// The interpreter only borrows its world; the host keeps ownership and can
/// inspect it once evaluation is done.
pub trait World {
    /// Whether the item with this label is in the player's inventory.
    fn in_inventory(&self, label: &str) -> bool;

    /// Moves an item or NPC (or the player, as `@PLAYER`) to `destination`.
    /// Returns whether anything moved.
    fn move_to(&mut self, label: &str, destination: &str) -> bool;

    /// Shows text to the player. Returns whether it was emitted.
    fn output(&mut self, text: &str) -> bool;
}

/// An in-memory world: a set of carried labels, a location per moved label
/// and a transcript of everything output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryWorld {
    inventory: BTreeSet<String>,
    locations: BTreeMap<String, String>,
    transcript: Vec<String>,
    echo: bool,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`MemoryWorld::new`], but output is also printed to stdout.
    pub fn echoing() -> Self {
        MemoryWorld {
            echo: true,
            ..Self::default()
        }
    }

    pub fn carry(&mut self, label: &str) {
        self.inventory.insert(label.to_ascii_uppercase());
    }

    pub fn location(&self, label: &str) -> Option<&str> {
        self.locations
            .get(&label.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }
}

impl World for MemoryWorld {
    fn in_inventory(&self, label: &str) -> bool {
        self.inventory.contains(&label.to_ascii_uppercase())
    }

    fn move_to(&mut self, label: &str, destination: &str) -> bool {
        let label = label.trim().to_ascii_uppercase();
        let destination = destination.trim().to_ascii_uppercase();
        if label.is_empty() || destination.is_empty() {
            return false;
        }
        tracing::debug!(%label, %destination, "move");
        // anything that moves somewhere else leaves the inventory
        self.inventory.remove(&label);
        self.locations.insert(label, destination);
        true
    }

    fn output(&mut self, text: &str) -> bool {
        if self.echo {
            println!("{text}");
        }
        self.transcript.push(text.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_out_of_the_inventory() {
        let mut world = MemoryWorld::new();
        world.carry("lamp");
        assert!(world.in_inventory("LAMP"));
        assert!(world.move_to("lamp", "cellar"));
        assert!(!world.in_inventory("lamp"));
        assert_eq!(world.location("Lamp"), Some("CELLAR"));
        assert!(!world.move_to("", "cellar"));
    }

    #[test]
    fn output_is_recorded() {
        let mut world = MemoryWorld::new();
        assert!(world.output("hello"));
        assert_eq!(world.transcript(), ["hello".to_string()]);
    }
}
