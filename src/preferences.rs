//! User dietary preferences and the directive block rendered from them.
//!
//! Each preference category is an enum with an explicit `(flag, key, label)`
//! table. The wire format is the device's checkbox shape, one object per
//! category mapping flag keys to booleans; unknown keys are ignored.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

pub const ALLERGIES_HEADER: &str = "ALLERGIES (CRITICAL - MUST AVOID)";
pub const INTOLERANCES_HEADER: &str = "INTOLERANCES (SAFETY - MUST FLAG)";
pub const DIETARY_PATTERNS_HEADER: &str = "DIETARY PATTERNS";
pub const HEALTH_MODES_HEADER: &str = "HEALTH MODES (ACTIVE - SCORE EACH)";
pub const HEALTH_MODE_KEYS_HEADER: &str = "HEALTH MODE KEYS (REQUIRED IN JSON)";
pub const AVOID_HEADER: &str = "AVOID INGREDIENTS";
pub const CUSTOM_CONSTRAINTS_HEADER: &str = "CUSTOM CONSTRAINTS";

/// A single checkbox in one preference category.
pub trait PreferenceFlag: Copy + Ord + fmt::Debug + 'static {
    /// Every flag of the category with its wire key and display label, in display order.
    const TABLE: &'static [(Self, &'static str, &'static str)];

    fn key(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(flag, _, _)| *flag == self)
            .map(|(_, key, _)| *key)
            .unwrap_or_default()
    }

    fn label(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(flag, _, _)| *flag == self)
            .map(|(_, _, label)| *label)
            .unwrap_or_default()
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, k, _)| *k == key)
            .map(|(flag, _, _)| *flag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Allergy {
    Peanuts,
    TreeNuts,
    Milk,
    Eggs,
    Wheat,
    Soy,
    Fish,
    Shellfish,
    Sesame,
    Corn,
    Sulfites,
}

impl PreferenceFlag for Allergy {
    const TABLE: &'static [(Self, &'static str, &'static str)] = &[
        (Allergy::Peanuts, "peanuts", "Peanuts"),
        (Allergy::TreeNuts, "treeNuts", "Tree nuts"),
        (Allergy::Milk, "milk", "Milk"),
        (Allergy::Eggs, "eggs", "Eggs"),
        (Allergy::Wheat, "wheat", "Wheat"),
        (Allergy::Soy, "soy", "Soy"),
        (Allergy::Fish, "fish", "Fish"),
        (Allergy::Shellfish, "shellfish", "Shellfish"),
        (Allergy::Sesame, "sesame", "Sesame"),
        (Allergy::Corn, "corn", "Corn"),
        (Allergy::Sulfites, "sulfites", "Sulfites"),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Intolerance {
    Lactose,
    Gluten,
    Fructose,
    Histamine,
    Fodmap,
}

impl PreferenceFlag for Intolerance {
    const TABLE: &'static [(Self, &'static str, &'static str)] = &[
        (Intolerance::Lactose, "lactose", "Lactose"),
        (Intolerance::Gluten, "gluten", "Gluten"),
        (Intolerance::Fructose, "fructose", "Fructose"),
        (Intolerance::Histamine, "histamine", "Histamine"),
        (Intolerance::Fodmap, "fodmap", "FODMAPs"),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DietaryPattern {
    Vegan,
    Vegetarian,
    Pescatarian,
    Keto,
    LowCarb,
    Paleo,
    WholeFoods,
    PlantForward,
}

impl PreferenceFlag for DietaryPattern {
    const TABLE: &'static [(Self, &'static str, &'static str)] = &[
        (DietaryPattern::Vegan, "vegan", "Vegan"),
        (DietaryPattern::Vegetarian, "vegetarian", "Vegetarian"),
        (DietaryPattern::Pescatarian, "pescatarian", "Pescatarian"),
        (DietaryPattern::Keto, "keto", "Keto"),
        (DietaryPattern::LowCarb, "lowCarb", "Low carb"),
        (DietaryPattern::Paleo, "paleo", "Paleo"),
        (DietaryPattern::WholeFoods, "wholeFoods", "Whole foods"),
        (DietaryPattern::PlantForward, "plantForward", "Plant forward"),
    ];
}

/// An independently scored health goal. The wire key doubles as the
/// `healthModeScores` key the model must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HealthMode {
    DiabetesFriendly,
    HeartHealth,
    WeightManagement,
    GutHealth,
    HighProtein,
    LowSodium,
    LowAddedSugar,
}

impl PreferenceFlag for HealthMode {
    const TABLE: &'static [(Self, &'static str, &'static str)] = &[
        (
            HealthMode::DiabetesFriendly,
            "diabetesFriendly",
            "Diabetes-friendly (Type 1 / Type 2)",
        ),
        (HealthMode::HeartHealth, "heartHealth", "Heart health"),
        (HealthMode::WeightManagement, "weightManagement", "Weight management"),
        (HealthMode::GutHealth, "gutHealth", "Gut health"),
        (HealthMode::HighProtein, "highProtein", "High-protein focus"),
        (HealthMode::LowSodium, "lowSodium", "Low-sodium focus"),
        (HealthMode::LowAddedSugar, "lowAddedSugar", "Low-added-sugar focus"),
    ];
}

impl HealthMode {
    /// Recover the required health modes from a directive block's keys line.
    ///
    /// Used when a caller sends a pre-formatted directive instead of structured
    /// preferences. Unknown keys are dropped.
    pub fn parse_directive_keys(directive: &str) -> Vec<HealthMode> {
        let prefix = format!("{}:", HEALTH_MODE_KEYS_HEADER);
        let mut modes = BTreeSet::new();

        for line in directive.lines() {
            if let Some(rest) = line.trim().strip_prefix(&prefix) {
                for key in rest.split(',').map(str::trim).filter(|k| !k.is_empty()) {
                    match HealthMode::from_key(key) {
                        Some(mode) => {
                            modes.insert(mode);
                        }
                        None => debug!("Ignoring unknown health mode key in directive: {}", key),
                    }
                }
            }
        }

        modes.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IngredientAvoidance {
    ArtificialSweeteners,
    SeedOils,
    UltraProcessed,
    AddedSugars,
    HighFructoseCornSyrup,
    Emulsifiers,
    FoodDyes,
}

impl PreferenceFlag for IngredientAvoidance {
    const TABLE: &'static [(Self, &'static str, &'static str)] = &[
        (
            IngredientAvoidance::ArtificialSweeteners,
            "artificialSweeteners",
            "Artificial sweeteners",
        ),
        (IngredientAvoidance::SeedOils, "seedOils", "Seed oils"),
        (
            IngredientAvoidance::UltraProcessed,
            "ultraProcessed",
            "Ultra-processed foods",
        ),
        (IngredientAvoidance::AddedSugars, "addedSugars", "Added sugars"),
        (
            IngredientAvoidance::HighFructoseCornSyrup,
            "highFructoseCornSyrup",
            "High-fructose corn syrup",
        ),
        (IngredientAvoidance::Emulsifiers, "emulsifiers", "Emulsifiers"),
        (IngredientAvoidance::FoodDyes, "foodDyes", "Food dyes"),
    ];
}

/// The active flags of one category. Iterates in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet<F: PreferenceFlag>(BTreeSet<F>);

impl<F: PreferenceFlag> Default for FlagSet<F> {
    fn default() -> Self {
        Self(BTreeSet::new())
    }
}

impl<F: PreferenceFlag> FlagSet<F> {
    pub fn insert(&mut self, flag: F) {
        self.0.insert(flag);
    }

    pub fn contains(&self, flag: F) -> bool {
        self.0.contains(&flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        self.0.iter().copied()
    }

    fn labels(&self) -> String {
        self.iter().map(F::label).collect::<Vec<_>>().join(", ")
    }
}

impl<F: PreferenceFlag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<F: PreferenceFlag> Serialize for FlagSet<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(F::TABLE.len()))?;
        for (flag, key, _) in F::TABLE {
            map.serialize_entry(key, &self.contains(*flag))?;
        }
        map.end()
    }
}

impl<'de, F: PreferenceFlag> Deserialize<'de> for FlagSet<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, bool>::deserialize(deserializer)?;
        let mut set = BTreeSet::new();
        for (key, enabled) in raw {
            match F::from_key(&key) {
                Some(flag) if enabled => {
                    set.insert(flag);
                }
                Some(_) => {}
                None => debug!("Ignoring unknown preference flag: {}", key),
            }
        }
        Ok(Self(set))
    }
}

/// Dietary needs, allergies, health modes and custom constraints for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub allergies: FlagSet<Allergy>,
    pub intolerances: FlagSet<Intolerance>,
    pub dietary_patterns: FlagSet<DietaryPattern>,
    pub health_modes: FlagSet<HealthMode>,
    pub ingredient_avoidance: FlagSet<IngredientAvoidance>,
    pub custom_constraints: String,
}

impl UserPreferences {
    pub fn has_any(&self) -> bool {
        !self.allergies.is_empty()
            || !self.intolerances.is_empty()
            || !self.dietary_patterns.is_empty()
            || !self.health_modes.is_empty()
            || !self.ingredient_avoidance.is_empty()
            || !self.custom_constraints.trim().is_empty()
    }

    /// Health modes the model must return a score for, in display order.
    pub fn active_health_modes(&self) -> Vec<HealthMode> {
        self.health_modes.iter().collect()
    }

    /// Render the directive block injected into the scoring prompt.
    ///
    /// Returns an empty string when nothing is selected, so callers can omit the
    /// preferences section entirely.
    pub fn to_directive(&self) -> String {
        if !self.has_any() {
            return String::new();
        }

        let mut sections = Vec::new();

        if !self.allergies.is_empty() {
            sections.push(format!("{}: {}", ALLERGIES_HEADER, self.allergies.labels()));
        }
        if !self.intolerances.is_empty() {
            sections.push(format!(
                "{}: {}",
                INTOLERANCES_HEADER,
                self.intolerances.labels()
            ));
        }
        if !self.dietary_patterns.is_empty() {
            sections.push(format!(
                "{}: {}",
                DIETARY_PATTERNS_HEADER,
                self.dietary_patterns.labels()
            ));
        }
        if !self.health_modes.is_empty() {
            sections.push(format!(
                "{}: {}",
                HEALTH_MODES_HEADER,
                self.health_modes.labels()
            ));
            let keys = self
                .health_modes
                .iter()
                .map(HealthMode::key)
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("{}: {}", HEALTH_MODE_KEYS_HEADER, keys));
        }
        if !self.ingredient_avoidance.is_empty() {
            sections.push(format!(
                "{}: {}",
                AVOID_HEADER,
                self.ingredient_avoidance.labels()
            ));
        }
        let custom = self.custom_constraints.trim();
        if !custom.is_empty() {
            sections.push(format!("{}: {}", CUSTOM_CONSTRAINTS_HEADER, custom));
        }

        sections.join("\n")
    }
}
