use fail::FailScenario;

/// Fail scenario that configures a set of fail points and turns them off again on drop.
pub struct ConfiguredFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> ConfiguredFailScenario<'a> {
    /// Configures each `(fail point, action)` pair, for example `("block_writer.before_finish", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> ConfiguredFailScenario<'a> {
        let scenario = FailScenario::setup();
        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

impl Drop for ConfiguredFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::cfg(failpoint, "off").unwrap();
        }
    }
}
