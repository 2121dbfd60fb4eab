use crate::config::{CohortConfig, ModelConfig};

// Per-batch action probabilities, all in [0, 1]. Built once, then shared
// read-only across workers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityModel {
    pub oob: f64,
    pub fbl: f64,
    pub open: f64,
    pub open_again: f64,
    pub click: f64,
    pub click_again: f64,

    pub open_again_given_open: f64,
    pub click_given_open: f64,
    pub click_again_given_click: f64,
}

impl ProbabilityModel {
    // Convert configured percentages into per-message probabilities.
    //
    // The upstream platform already handles a share of the traffic
    // (in-band bounces, blackholing) that this engine never sees, so every
    // probability is rescaled by 1 / (1 - upstream). The open family is
    // additionally scaled by the weekly shape factor for the current day
    // divided by the fraction of recipient digits active today: only that
    // cohort can open mail today, so its per-message probability has to be
    // inflated to preserve the aggregate open rate.
    pub fn build(
        config: &ModelConfig,
        day_factor: f64,
        digit_density: f64,
    ) -> crate::config::Result<Self> {
        let this_app_traffic = 1.0 - config.upstream_handled_pct / 100.0;
        if this_app_traffic <= 0.0 {
            return Err(
                "Upstream-handled percentage leaves no traffic for this engine.".to_string(),
            );
        }

        let base = |pct: f64| pct / 100.0 / this_app_traffic;
        let open_scale = if digit_density > 0.0 {
            day_factor / digit_density
        } else {
            // An empty cohort leaves nothing to open today; skip scaling
            // rather than divide by zero.
            1.0
        };
        let open_family = |pct: f64| (base(pct) * open_scale).clamp(0.0, 1.0);

        let open = open_family(config.open_pct);
        let open_again = open_family(config.open_again_pct);
        let click = open_family(config.click_pct);
        let click_again = open_family(config.click_again_pct);

        Ok(ProbabilityModel {
            oob: base(config.oob_pct),
            fbl: base(config.fbl_pct),
            open,
            open_again,
            click,
            click_again,
            open_again_given_open: conditional("OpenAgain", open_again, "Open", open)?,
            click_given_open: conditional("Click", click, "Open", open)?,
            click_again_given_click: conditional("ClickAgain", click_again, "Click", click)?,
        })
    }

    // Build for the current wall-clock day from the configured weekly shape
    // and per-digit day sets.
    pub fn build_today(
        config: &ModelConfig,
        cohort: &CohortConfig,
        timestamp: u64,
    ) -> crate::config::Result<Self> {
        let dt = mail_parser::DateTime::from_timestamp(timestamp as i64);
        let day_factor = config.weekly_shape[dt.day_of_week() as usize % 7];
        Self::build(config, day_factor, cohort.density(dt.day))
    }
}

fn conditional(a: &str, p_a: f64, b: &str, p_b: f64) -> crate::config::Result<f64> {
    if p_b == 0.0 {
        // Nothing to condition on, the dependent event can never fire
        return if p_a == 0.0 {
            Ok(0.0)
        } else {
            Err(format!(
                "Configured {a} percentage is nonzero while {b} is zero."
            ))
        };
    }
    let p = p_a / p_b;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!(
            "Configured {a} and {b} percentages imply P({a}|{b}) = {p:.3}, out of range."
        ))
    }
}
