//! JSON report

use std::io;

use super::{Report, ReportWriter};
use crate::common::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWriter;

impl ReportWriter for JsonWriter {
    fn write(&self, report: &Report, out: &mut dyn io::Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;
    use serde_json::Value;

    #[test]
    fn test_json_layout() {
        let mut buffer = Vec::new();
        JsonWriter.write(&fixtures::report(), &mut buffer).unwrap();
        let value: Value = serde_json::from_slice(&buffer).unwrap();

        assert_eq!(value["name"], "chainsaw");
        assert_eq!(value["tests"].as_array().unwrap().len(), 3);
        let failing = &value["tests"][1];
        assert_eq!(failing["basePath"], "tests/failing");
        let operation = &failing["steps"][1]["operations"][0];
        assert_eq!(operation["type"], "apply");
        assert_eq!(operation["section"], "try");
        assert_eq!(operation["error"], "no actual resource found");
        assert_eq!(value["tests"][2]["skipped"], true);
        assert!(value["tests"][0].get("skipped").is_none());
    }
}
