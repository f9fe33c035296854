use qrstudio_core::PlanTier;
use qrstudio_core::plan::{self, Feature};

/// Render the plan catalog, marking the caller's current plan.
pub fn format_plans(current: PlanTier) -> String {
    let mut out = format!(
        "{:<2}{:<6} {:>8} {:>11} {:>10} {:>10}\n",
        "", "PLAN", "DYNAMIC", "STORAGE MB", "CUSTOMIZE", "ANALYTICS"
    );
    for tier in PlanTier::ALL {
        let limits = plan::limits_for(tier);
        let marker = if tier == current { "*" } else { "" };
        out.push_str(&format!(
            "{:<2}{:<6} {:>8} {:>11} {:>10} {:>10}\n",
            marker,
            tier.to_string(),
            limits.max_dynamic_codes.to_string(),
            limits.max_storage_mb.to_string(),
            yes_no(limits.can_customize_appearance),
            yes_no(limits.can_track_analytics),
        ));
    }
    out.push('\n');
    for feature in Feature::ALL {
        out.push_str(&format!("{:<16} from {}\n", feature.to_string(), feature.min_tier()));
    }
    out
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

pub fn run_plans(current: PlanTier) {
    print!("{}", format_plans(current));
}
