use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use super::{InfoboxMerge, read_infobox_fragment};
use crate::block::{Span, field_value, find_all_regex, replace_span};
use crate::orchestrator::{Orchestration, PageContext, Step, run_steps};
use crate::schema::vehicle_merge_policy;

static INFOBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{Infobox\s*vehicle[\s\S]*?\n\}\}").expect("valid vehicle infobox pattern")
});
static PART_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\{\{Infobox\s*vehicle\s+part").expect("valid vehicle part pattern")
});

/// First vehicle infobox that is not a `vehicle part` infobox.
fn find_infobox(text: &str) -> Option<Span> {
    find_all_regex(text, &INFOBOX)
        .into_iter()
        .find(|span| !PART_HEADER.is_match(&text[span.clone()]))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleIds {
    pub vehicle_id: Option<String>,
}

impl VehicleIds {
    pub fn from_text(text: &str) -> Self {
        let vehicle_id = find_infobox(text).and_then(|span| field_value(&text[span], "vehicle_id"));
        Self { vehicle_id }
    }
}

const STEPS: &[Step<VehicleIds>] = &[Step::new("Infobox", infobox)];

pub fn orchestrate(text: &str, page: &PageContext<'_>) -> Orchestration {
    let ids = VehicleIds::from_text(text);
    run_steps(text, page, &ids, STEPS)
}

fn infobox(text: &str, page: &PageContext<'_>, ids: &VehicleIds) -> Result<Option<String>> {
    let (Some(span), Some(vehicle_id)) = (find_infobox(text), ids.vehicle_id.as_deref()) else {
        return Ok(None);
    };
    let Some(fragment) = read_infobox_fragment(page, &["vehicle", "infoboxes"], vehicle_id)? else {
        return Ok(None);
    };
    let merger = InfoboxMerge {
        header: "Infobox vehicle",
        policy: vehicle_merge_policy(),
        order: &page.schemas.vehicle,
    };
    Ok(merger
        .apply(&text[span.clone()], &fragment, Some(vehicle_id))
        .map(|rebuilt| replace_span(text, &span, &rebuilt)))
}

#[cfg(test)]
mod tests {
    use super::{VehicleIds, orchestrate};
    use crate::steps::test_support::Fixture;

    #[test]
    fn infobox_keeps_skins_and_models() {
        let fixture = Fixture::new();
        fixture.fragment(
            "en/vehicle/infoboxes/Base.CarNormal.txt",
            "|name=Chevalier Nyala\n|model=New.png\n|skin=Blue\n|mass=800\n|vehicle_id=Base.CarNormal\n",
        );
        let text = "{{Infobox vehicle\n|name=Chevalier Nyala\n|model=Old.png\n|skin=Red\n|skin2=Green\n|mass=750\n|vehicle_id=Base.CarNormal\n}}";
        let result = orchestrate(text, &fixture.page("Chevalier Nyala", "en"));
        assert_eq!(result.processes, vec!["Infobox"]);
        assert!(result.text.contains("|model=Old.png\n"));
        assert!(result.text.contains("|skin=Red\n"));
        assert!(result.text.contains("|skin2=Green\n"));
        assert!(result.text.contains("|mass=800\n"));
        assert!(!result.text.contains("New.png"));

        let again = orchestrate(&result.text, &fixture.page("Chevalier Nyala", "en"));
        assert!(again.processes.is_empty());
    }

    #[test]
    fn vehicle_part_infoboxes_are_not_vehicles() {
        let fixture = Fixture::new();
        fixture.fragment("en/vehicle/infoboxes/Base.Tire.txt", "|vehicle_id=Base.Tire\n|mass=1\n");
        let text = "{{Infobox vehicle part\n|vehicle_id=Base.Tire\n}}";
        assert_eq!(VehicleIds::from_text(text).vehicle_id, None);
        let result = orchestrate(text, &fixture.page("Tire", "en"));
        assert_eq!(result.text, text);
        assert!(!result.edited);
    }

    #[test]
    fn missing_fragment_is_a_no_op() {
        let fixture = Fixture::new();
        let text = "{{Infobox vehicle\n|vehicle_id=Base.Van\n}}";
        let result = orchestrate(text, &fixture.page("Van", "en"));
        assert_eq!(result.text, text);
        assert!(result.processes.is_empty());
    }
}
