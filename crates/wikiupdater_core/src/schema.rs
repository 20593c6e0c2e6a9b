//! Field-order tables and protected-field predicates per category.
//!
//! The tables are plain data: `Schemas::default()` carries the built-in
//! orders and `[sort_order]` in the config file can replace any of them.

use crate::config::SortOrderSection;
use crate::fields::{MergePolicy, SortOrder, protect_nothing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schemas {
    pub item: SortOrder,
    pub tile: SortOrder,
    pub vehicle: SortOrder,
}

impl Default for Schemas {
    fn default() -> Self {
        Self {
            item: SortOrder::new(&item_sort_keys()),
            tile: SortOrder::new(&tile_sort_keys()),
            vehicle: SortOrder::new(&vehicle_sort_keys()),
        }
    }
}

impl Schemas {
    pub fn with_overrides(overrides: &SortOrderSection) -> Self {
        let mut schemas = Self::default();
        if let Some(keys) = &overrides.item {
            schemas.item = SortOrder::new(&normalize_keys(keys));
        }
        if let Some(keys) = &overrides.tile {
            schemas.tile = SortOrder::new(&normalize_keys(keys));
        }
        if let Some(keys) = &overrides.vehicle {
            schemas.vehicle = SortOrder::new(&normalize_keys(keys));
        }
        schemas
    }
}

fn normalize_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(|key| {
            if key.starts_with('|') {
                key.to_string()
            } else {
                format!("|{key}")
            }
        })
        .collect()
}

const ITEM_PROTECTED_PREFIXES: &[&str] = &[
    "|icon",
    "|icon_name",
    "|model",
    "|itemdisplayname",
    "|media_title",
    "|recipes",
    "|boredom_change",
    "|cooking_change",
    "|carpentry_change",
    "|farming_change",
    "|first_aid_change",
    "|electrical_change",
    "|metalworking_change",
    "|mechanics_change",
    "|tailoring_change",
    "|aiming_change",
    "|reloading_change",
    "|fishing_change",
    "|trapping_change",
    "|foraging_change",
    "|long_blunt_change",
    "|short_blade_change",
    "|lightfooted_change",
    "|unhappy_change",
    "|stress_change",
    "|panic_change",
    "|fatigue_change",
    "|endurance_change",
    "|fitness_change",
];

/// Item families whose display names are curated by hand on the wiki.
const ITEM_CURATED_NAME_PREFIXES: &[&str] = &["Base.VHS_", "Base.Disc_"];

const VEHICLE_PROTECTED_PREFIXES: &[&str] =
    &["|icon", "|icon_name", "|model", "|media_title", "|skin"];

pub fn protect_item_field(key: &str, item_id: Option<&str>) -> bool {
    if ITEM_PROTECTED_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
    {
        return true;
    }
    key.starts_with("|name")
        && item_id.is_some_and(|id| {
            ITEM_CURATED_NAME_PREFIXES
                .iter()
                .any(|prefix| id.starts_with(prefix))
        })
}

pub fn protect_vehicle_field(key: &str, _vehicle_id: Option<&str>) -> bool {
    VEHICLE_PROTECTED_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

pub fn item_merge_policy() -> MergePolicy {
    MergePolicy {
        protect: protect_item_field,
        keep_unmatched: false,
    }
}

pub fn vehicle_merge_policy() -> MergePolicy {
    MergePolicy {
        protect: protect_vehicle_field,
        keep_unmatched: false,
    }
}

pub fn tile_merge_policy() -> MergePolicy {
    MergePolicy {
        protect: protect_nothing,
        keep_unmatched: true,
    }
}

struct KeyList(Vec<String>);

impl KeyList {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn keys(mut self, keys: &[&str]) -> Self {
        self.0.extend(keys.iter().map(|key| (*key).to_string()));
        self
    }

    /// `prefix`, then `prefix2` through `prefix{last}`.
    fn numbered(mut self, prefix: &str, last: u32) -> Self {
        self.0.push(prefix.to_string());
        self.0.extend((2..=last).map(|index| format!("{prefix}{index}")));
        self
    }

    /// `prefix{first}` through `prefix{last}`.
    fn range(mut self, prefix: &str, first: u32, last: u32) -> Self {
        self.0
            .extend((first..=last).map(|index| format!("{prefix}{index}")));
        self
    }

    fn build(self) -> Vec<String> {
        self.0
    }
}

pub fn item_sort_keys() -> Vec<String> {
    KeyList::new()
        .keys(&["|name", "|media_title"])
        .numbered("|icon", 20)
        .numbered("|model", 20)
        .numbered("|icon_name", 20)
        .keys(&[
            "|category",
            "|weight",
            "|weight_full",
            "|weight_reduction",
            "|max_units",
            "|equipped",
            "|attachment_type",
        ])
        .numbered("|body_location", 7)
        .keys(&["|attachments_provided", "|function", "|primary_use", "|weapon"])
        .range("|weapon", 1, 10)
        .keys(&[
            "|part_type",
            "|skill_type",
            "|ammo_type",
            "|clip_size",
            "|material",
            "|material_value",
            "|metal_value",
            "|burn_time",
            "|contents",
            "|can_boil_water",
            "|consumed",
            "|writable",
            "|recipes",
            "|skill_trained",
            "|page_number",
            "|vol_number",
            "|packaged",
            "|feed_type",
            "|rain_factor",
            "|days_fresh",
            "|days_rotten",
            "|cant_be_frozen",
            "|condition_max",
            "|condition_lower_chance",
            "|run_speed",
            "|stomp_power",
            "|combat_speed",
            "|scratch_defense",
            "|bite_defense",
            "|bullet_defense",
            "|neck_protection",
            "|insulation",
            "|wind_resistance",
            "|water_resistance",
            "|discomfort_mod",
            "|endurance_mod",
            "|light_distance",
            "|light_strength",
            "|torch_cone",
            "|wet_cooldown",
            "|sensor_range",
            "|energy_source",
            "|two_way",
            "|mic_range",
            "|transmit_range",
            "|min_channel",
            "|max_channel",
            "|damage_type",
            "|min_damage",
            "|max_damage",
            "|door_damage",
            "|tree_damage",
            "|sharpness",
            "|min_range",
            "|max_range",
            "|min_range_mod",
            "|max_range_mod",
            "|hit_chance",
            "|recoil_delay",
            "|sound_radius",
            "|base_speed",
            "|swing_time",
            "|push_back",
            "|knockdown",
            "|aiming_time",
            "|aiming_mod",
            "|reload_time",
            "|crit_chance",
            "|crit_multiplier",
            "|angle_mod",
            "|kill_move",
            "|weight_mod",
            "|reload_mod",
            "|aiming_change",
            "|reloading_change",
            "|effect_type",
            "|type",
            "|effect_power",
            "|effect_range",
            "|effect_duration",
            "|effect_timer",
            "|hunger_change",
            "|thirst_change",
            "|calories",
            "|carbohydrates",
            "|proteins",
            "|lipids",
            "|unhappy_change",
            "|boredom_change",
            "|carpentry_change",
            "|cooking_change",
            "|farming_change",
            "|foraging_change",
            "|first_aid_change",
            "|electrical_change",
            "|metalworking_change",
            "|mechanics_change",
            "|tailoring_change",
            "|stress_change",
            "|panic_change",
            "|fatigue_change",
            "|endurance_change",
            "|flu_change",
            "|pain_change",
            "|sick_change",
            "|alcoholic",
            "|alcohol_power",
            "|reduce_infection_power",
            "|bandage_power",
            "|poison_power",
            "|cook_minutes",
            "|burn_minutes",
            "|dangerous_uncooked",
            "|bad_microwaved",
            "|good_hot",
            "|bad_cold",
            "|spice",
            "|evolved_recipe",
            "|workstation",
            "|tool",
            "|ingredients",
        ])
        .numbered("|tag", 10)
        .keys(&[
            "|capacity",
            "|fluid_capacity",
            "|container_name",
            "|clothing_item",
            "|itemdisplayname",
            "|recmedia",
        ])
        .numbered("|guid", 20)
        .numbered("|item_id", 10)
        .keys(&["|infobox_version"])
        .build()
}

pub fn vehicle_sort_keys() -> Vec<String> {
    KeyList::new()
        .keys(&["|name", "|media_title"])
        .numbered("|icon", 5)
        .numbered("|icon_name", 5)
        .numbered("|model", 5)
        .keys(&[
            "|category",
            "|weight",
            "|capacity",
            "|seats",
            "|max_speed",
            "|engine_force",
            "|engine_quality",
            "|engine_power",
            "|mass",
            "|suspension_damping",
            "|suspension_compression",
            "|max_suspension_force",
            "|engine_loudness",
            "|headlight_range",
            "|gas_consumption",
            "|trunk_capacity",
            "|glove_compartment_capacity",
            "|tire_friction",
            "|brake_force",
            "|condition_max",
            "|player_damage_protection",
            "|script_name",
        ])
        .numbered("|skin", 5)
        .numbered("|vehicle_id", 5)
        .keys(&["|infobox_version"])
        .build()
}

pub fn tile_sort_keys() -> Vec<String> {
    let mut icons = KeyList::new().keys(&["|name", "|icon", "|icon_name"]);
    for index in 2..=9 {
        icons = icons.range("|icon", index, index).range("|icon_name", index, index);
    }
    icons
        .keys(&[
            "|category",
            "|weight",
            "|size",
            "|placement",
            "|function",
            "|type",
            "|container",
            "|health",
            "|capacity",
            "|liquid_capacity",
            "|freezer_capacity",
            "|fuel",
            "|contents",
            "|strength",
            "|animals",
            "|bed_type",
            "|is_table_top",
            "|is_low",
            "|build_skill",
            "|build_level",
            "|build_tool",
            "|ingredients",
            "|move_skill",
            "|move_level",
            "|move_tool",
            "|move_type",
            "|pickup_skill",
            "|pickup_level",
            "|pickup_tool",
            "|pickup_tool_tag",
            "|place_tool",
            "|place_tool_tag",
            "|disassemble_skill",
            "|disassemble_level",
        ])
        .numbered("|disassemble_tool", 4)
        .numbered("|disassemble_tool_tag", 4)
        .keys(&["|products", "|tags", "|item_id", "|item_id_more"])
        .numbered("|tile_id", 9)
        .numbered("|sprite_id", 9)
        .keys(&["|sprite_id_more", "|infobox_version"])
        .build()
}

#[cfg(test)]
mod tests {
    use super::{
        Schemas, item_sort_keys, protect_item_field, protect_vehicle_field, tile_sort_keys,
        vehicle_sort_keys,
    };
    use crate::config::SortOrderSection;

    #[test]
    fn item_table_places_identifiers_last() {
        let keys = item_sort_keys();
        assert_eq!(keys.first().map(String::as_str), Some("|name"));
        assert_eq!(keys.last().map(String::as_str), Some("|infobox_version"));
        let weight = keys.iter().position(|key| key == "|weight").expect("weight");
        let condition = keys
            .iter()
            .position(|key| key == "|condition_max")
            .expect("condition_max");
        let item_id = keys.iter().position(|key| key == "|item_id").expect("item_id");
        assert!(weight < condition && condition < item_id);
        assert!(keys.contains(&"|weapon1".to_string()));
        assert!(keys.contains(&"|icon_name20".to_string()));
    }

    #[test]
    fn tile_table_interleaves_icons_and_names() {
        let keys = tile_sort_keys();
        assert_eq!(&keys[..5], &["|name", "|icon", "|icon_name", "|icon2", "|icon_name2"]);
        assert!(keys.contains(&"|sprite_id9".to_string()));
    }

    #[test]
    fn vehicle_table_ends_with_version() {
        let keys = vehicle_sort_keys();
        assert_eq!(keys.last().map(String::as_str), Some("|infobox_version"));
        assert!(keys.contains(&"|skin5".to_string()));
    }

    #[test]
    fn item_name_is_protected_only_for_media_families() {
        assert!(protect_item_field("|name", Some("Base.VHS_Home1")));
        assert!(protect_item_field("|name", Some("Base.Disc_Retail")));
        assert!(!protect_item_field("|name", Some("Base.Axe")));
        assert!(!protect_item_field("|name", None));
        assert!(protect_item_field("|icon3", Some("Base.Axe")));
        assert!(protect_item_field("|panic_change", None));
        assert!(!protect_item_field("|weight", Some("Base.VHS_Home1")));
    }

    #[test]
    fn vehicle_skins_are_protected() {
        assert!(protect_vehicle_field("|skin2", None));
        assert!(!protect_vehicle_field("|mass", None));
    }

    #[test]
    fn overrides_replace_tables_and_add_pipes() {
        let schemas = Schemas::with_overrides(&SortOrderSection {
            item: Some(vec!["weight".to_string(), "|name".to_string(), " ".to_string()]),
            tile: None,
            vehicle: None,
        });
        assert_eq!(schemas.item.keys(), &["|weight", "|name"]);
        assert_eq!(schemas.tile, Schemas::default().tile);
    }
}
