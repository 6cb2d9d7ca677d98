pub mod first_observation;
pub mod significant_delta;
pub mod state_transition;
pub mod structural_change;
pub mod threshold;

pub(crate) fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "unknown".to_string(),
    }
}
