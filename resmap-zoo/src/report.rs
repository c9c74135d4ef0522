use std::io;

use rmc::{device::DeviceReport, inspect::DrawReport, inspect_draw};
use serde::{Deserialize, Serialize};

use crate::scenario::Zoo;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ZooReport {
    pub device: DeviceReport,
    pub draws: Vec<DrawReport>,
}

impl ZooReport {
    /// Inspect every recorded draw, or only the one named `marker`.
    pub fn generate(zoo: &Zoo, marker: Option<&str>) -> Self {
        let draws = zoo
            .commands
            .draws()
            .iter()
            .filter(|draw| marker.map_or(true, |marker| draw.marker.as_deref() == Some(marker)))
            .map(|draw| inspect_draw(&zoo.device, draw))
            .collect();

        Self {
            device: zoo.device.generate_report(),
            draws,
        }
    }

    pub fn draw(&self, marker: &str) -> Option<&DrawReport> {
        self.draws
            .iter()
            .find(|draw| draw.marker.as_deref() == Some(marker))
    }

    pub fn from_json(file: &str) -> serde_json::Result<Self> {
        serde_json::from_str(file)
    }

    pub fn into_json(self, output: impl io::Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(output, &self)
    }
}
