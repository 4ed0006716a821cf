//! Theaters and the current selection.
//!
//! A [`TheaterSet`] always has a valid selection: constructing it with an
//! unknown name falls back to the first theater, and [`TheaterSet::select`]
//! refuses names outside the set.

use serde::{Deserialize, Serialize};

/// A simulator map/campaign region with its own asset subdirectory.
///
/// Identity is the `name`. The base theater has no `add_on_subdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theater {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_on_subdir: Option<String>,
}

impl Theater {
    pub fn base(name: &str) -> Self {
        Self {
            name: name.to_string(),
            add_on_subdir: None,
        }
    }

    pub fn add_on(name: &str) -> Self {
        Self {
            name: name.to_string(),
            add_on_subdir: Some(format!("Add-On {name}")),
        }
    }
}

/// Theaters shipped with Falcon BMS 4.3x.
pub fn default_theaters() -> Vec<Theater> {
    vec![
        Theater::base("Korea"),
        Theater::add_on("Balkans"),
        Theater::add_on("Israel"),
        Theater::add_on("Aegean"),
        Theater::add_on("Nordic"),
    ]
}

/// Returned when a selection names a theater outside the set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown theater {0:?}")]
pub struct UnknownTheater(pub String);

/// The loaded theaters plus the selected one.
#[derive(Debug, Clone)]
pub struct TheaterSet {
    theaters: Vec<Theater>,
    selected: usize,
}

impl TheaterSet {
    /// Build the set and select `selected`.
    ///
    /// Returns `Err` alongside the set when `selected` is unknown; the set
    /// then falls back to the first theater. An empty list is replaced by
    /// [`default_theaters`].
    pub fn new(theaters: Vec<Theater>, selected: &str) -> (Self, Option<UnknownTheater>) {
        let theaters = if theaters.is_empty() {
            default_theaters()
        } else {
            theaters
        };
        match theaters.iter().position(|t| t.name == selected) {
            Some(selected) => (Self { theaters, selected }, None),
            None => (
                Self {
                    theaters,
                    selected: 0,
                },
                Some(UnknownTheater(selected.to_string())),
            ),
        }
    }

    pub fn selected(&self) -> &Theater {
        &self.theaters[self.selected]
    }

    pub fn theaters(&self) -> &[Theater] {
        &self.theaters
    }

    pub fn names(&self) -> Vec<String> {
        self.theaters.iter().map(|t| t.name.clone()).collect()
    }

    /// Change the selection. Returns `Ok(false)` if `name` was already selected.
    pub fn select(&mut self, name: &str) -> Result<bool, UnknownTheater> {
        let index = self
            .theaters
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| UnknownTheater(name.to_string()))?;
        if index == self.selected {
            return Ok(false);
        }
        self.selected = index;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_selects_named_theater() {
        let (set, unknown) = TheaterSet::new(default_theaters(), "Israel");
        assert!(unknown.is_none());
        assert_eq!(set.selected().name, "Israel");
        assert_eq!(
            set.selected().add_on_subdir.as_deref(),
            Some("Add-On Israel")
        );
    }

    #[test]
    fn test_new_unknown_falls_back_to_first() {
        let (set, unknown) = TheaterSet::new(default_theaters(), "Vietnam");
        assert_eq!(unknown, Some(UnknownTheater("Vietnam".into())));
        assert_eq!(set.selected().name, "Korea");
    }

    #[test]
    fn test_new_empty_list_uses_defaults() {
        let (set, _) = TheaterSet::new(Vec::new(), "Balkans");
        assert_eq!(set.theaters().len(), 5);
        assert_eq!(set.selected().name, "Balkans");
    }

    #[test]
    fn test_select() {
        let (mut set, _) = TheaterSet::new(default_theaters(), "Korea");
        assert_eq!(set.select("Balkans"), Ok(true));
        assert_eq!(set.select("Balkans"), Ok(false));
        let err = set.select("Atlantis").unwrap_err();
        assert_eq!(err.to_string(), "unknown theater \"Atlantis\"");
        assert_eq!(set.selected().name, "Balkans");
    }
}
