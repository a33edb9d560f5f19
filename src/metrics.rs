//! Prometheus metrics for generation, execution and the agent loop
//!
//! All metrics live in the default registry; [`render`] produces the text
//! exposition format for the `/metrics` command.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

/// Buckets for model calls, which routinely take tens of seconds on CPU
const GENERATION_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0];

lazy_static! {
    pub static ref GENERATIONS: CounterVec = register_counter_vec!(
        "pyscribe_generations_total",
        "Model generation calls by outcome",
        &["outcome"]
    )
    .expect("generation counter registers once");

    pub static ref GENERATION_DURATION: HistogramVec = register_histogram_vec!(
        "pyscribe_generation_duration_seconds",
        "Time spent waiting for the model",
        &["model"],
        GENERATION_BUCKETS.to_vec()
    )
    .expect("generation histogram registers once");

    pub static ref MODEL_LOAD_DURATION: HistogramVec = register_histogram_vec!(
        "pyscribe_model_load_duration_seconds",
        "Time to load a model into the engine",
        &["model"],
        GENERATION_BUCKETS.to_vec()
    )
    .expect("model load histogram registers once");

    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "pyscribe_executions_total",
        "Code executions by status",
        &["status"]
    )
    .expect("execution counter registers once");

    pub static ref EXECUTION_DURATION: Histogram = register_histogram!(
        "pyscribe_execution_duration_seconds",
        "Wall time of a single code execution"
    )
    .expect("execution histogram registers once");

    pub static ref INTERPRETER_STARTS: Counter = register_counter!(
        "pyscribe_interpreter_starts_total",
        "Interpreter processes started"
    )
    .expect("interpreter counter registers once");

    pub static ref AGENT_RETRIES: Counter = register_counter!(
        "pyscribe_agent_retries_total",
        "Repair attempts made by the agent loop"
    )
    .expect("retry counter registers once");

    pub static ref AGENT_EXHAUSTED: Counter = register_counter!(
        "pyscribe_agent_exhausted_total",
        "Agent runs stopped at the retry ceiling"
    )
    .expect("exhausted counter registers once");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_touched_metrics() {
        AGENT_RETRIES.inc();
        EXECUTIONS.with_label_values(&["success"]).inc();
        let text = render().unwrap();
        assert!(text.contains("pyscribe_agent_retries_total"));
        assert!(text.contains("pyscribe_executions_total{status=\"success\"}"));
    }
}
