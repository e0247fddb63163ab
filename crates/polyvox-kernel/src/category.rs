//! Category gain buses.
//!
//! Every sound belongs to exactly one category. A category holds a gain
//! multiplier; the table does not track which sounds use it. Changing a
//! category's gain is propagated by the manager scanning the voice pool.

use serde::{Deserialize, Serialize};

/// Identifier of a gain bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(u16);

impl CategoryId {
    /// Built-in music bus.
    pub const MUSIC: Self = Self(0);
    /// Built-in sound effects bus.
    pub const EFFECTS: Self = Self(1);

    /// Get the raw id.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Category {
    name: String,
    gain: f32,
}

/// Registered categories plus the master bus.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    categories: Vec<Category>,
    master: f32,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            categories: vec![
                Category {
                    name: "music".to_string(),
                    gain: 1.0,
                },
                Category {
                    name: "effects".to_string(),
                    gain: 1.0,
                },
            ],
            master: 1.0,
        }
    }
}

impl CategoryTable {
    /// Create a table with the built-in buses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bus, or return the existing one with the same name.
    pub fn register(&mut self, name: &str, gain: f32) -> CategoryId {
        if let Some(id) = self.by_name(name) {
            return id;
        }
        let id = CategoryId(self.categories.len() as u16);
        self.categories.push(Category {
            name: name.to_string(),
            gain: gain.max(0.0),
        });
        id
    }

    /// Look up a bus by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<CategoryId> {
        self.categories
            .iter()
            .position(|c| c.name == name)
            .map(|i| CategoryId(i as u16))
    }

    /// Name of a bus.
    #[must_use]
    pub fn name(&self, id: CategoryId) -> Option<&str> {
        self.categories.get(id.0 as usize).map(|c| c.name.as_str())
    }

    /// Check if the id was registered.
    #[must_use]
    pub fn contains(&self, id: CategoryId) -> bool {
        (id.0 as usize) < self.categories.len()
    }

    /// Gain of a bus, without the master.
    #[must_use]
    pub fn gain(&self, id: CategoryId) -> Option<f32> {
        self.categories.get(id.0 as usize).map(|c| c.gain)
    }

    /// Set the gain of a bus. Negative values are clamped to 0.
    ///
    /// Returns `false` for an unknown id.
    pub fn set_gain(&mut self, id: CategoryId, gain: f32) -> bool {
        match self.categories.get_mut(id.0 as usize) {
            Some(category) => {
                category.gain = gain.max(0.0);
                true
            },
            None => false,
        }
    }

    /// Master gain.
    #[must_use]
    pub const fn master(&self) -> f32 {
        self.master
    }

    /// Set the master gain. Negative values are clamped to 0.
    pub fn set_master(&mut self, gain: f32) {
        self.master = gain.max(0.0);
    }

    /// Combined multiplier for a bus (category times master).
    ///
    /// Unknown ids use a category gain of 1.
    #[must_use]
    pub fn multiplier(&self, id: CategoryId) -> f32 {
        self.gain(id).unwrap_or(1.0) * self.master
    }

    /// Number of registered buses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Always false; the built-in buses cannot be removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
