#![no_main]

use capmap::{AnalysisConfig, ProvenanceAnalysis, Report, TraceEvent};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary event lists must never panic the analysis pass
    let Ok(events) = serde_json::from_slice::<Vec<TraceEvent>>(data) else {
        return;
    };
    let config = AnalysisConfig {
        address_limit: 1 << 32,
        ..AnalysisConfig::default()
    };
    if let Ok(result) = ProvenanceAnalysis::new(config).run(&events, &[]) {
        let _ = Report::from_result(&result);
    }
});
