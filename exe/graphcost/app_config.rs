use serde::Deserialize;

/// Config file format (Option fields can be omitted).
#[derive(Debug, Deserialize)]
pub struct AppConfig {
  /// Whether to save intermediate representations next to the input
  pub artifacts: Option<bool>,
}

impl AppConfig {
  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      artifacts: other.artifacts.or(self.artifacts),
    }
  }
}

impl Default for AppConfig {
  fn default() -> Self {
    Self { artifacts: None }
  }
}
