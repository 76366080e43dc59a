//! Area tasks and their AppEEARS job descriptions.

use std::fmt;

use clap::ValueEnum;
use geojson::FeatureCollection;
use serde::Serialize;

use crate::{error::Result, geo::BoundingBox, period::DateRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
/// Raster container requested from AppEEARS.
pub enum OutputFormat {
    Geotiff,
    Netcdf4,
}

impl OutputFormat {
    pub fn api_name(&self) -> &'static str {
        match self {
            OutputFormat::Geotiff => "geotiff",
            OutputFormat::Netcdf4 => "netcdf4",
        }
    }

    /// Suffix of the primary raster files in a result bundle.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Geotiff => ".tif",
            OutputFormat::Netcdf4 => ".nc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Submitted,
    Running,
    Done,
    Failed,
    Stalled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// One (sub-interval, layer) request.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub task_name: String,
    pub product: String,
    pub parameter: String,
    pub date_range: DateRange,
    pub geo: FeatureCollection,
    pub format: OutputFormat,
    pub remote_id: Option<String>,
    pub status: TaskStatus,
}

impl DownloadTask {
    pub fn new(
        product: &str,
        parameter: &str,
        date_range: DateRange,
        bbox: &BoundingBox,
        format: OutputFormat,
    ) -> Self {
        DownloadTask {
            task_name: task_name(product, parameter, &date_range),
            product: product.to_string(),
            parameter: parameter.to_string(),
            date_range,
            geo: bbox.to_feature_collection(),
            format,
            remote_id: None,
            status: TaskStatus::Pending,
        }
    }

    /// The body of `POST task`.
    pub fn request(&self) -> TaskRequest<'_> {
        TaskRequest {
            task_type: "area",
            task_name: &self.task_name,
            params: TaskParams {
                dates: vec![DateSpan {
                    start_date: self.date_range.start().format("%m-%d-%Y").to_string(),
                    end_date: self.date_range.end().format("%m-%d-%Y").to_string(),
                }],
                layers: vec![Layer {
                    layer: &self.parameter,
                    product: &self.product,
                }],
                output: Output {
                    format: Format {
                        kind: self.format.api_name(),
                    },
                    projection: "geographic",
                },
                geo: &self.geo,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskRequest<'a> {
    task_type: &'static str,
    task_name: &'a str,
    params: TaskParams<'a>,
}

#[derive(Debug, Serialize)]
struct TaskParams<'a> {
    dates: Vec<DateSpan>,
    layers: Vec<Layer<'a>>,
    output: Output,
    geo: &'a FeatureCollection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateSpan {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Serialize)]
struct Layer<'a> {
    layer: &'a str,
    product: &'a str,
}

#[derive(Debug, Serialize)]
struct Output {
    format: Format,
    projection: &'static str,
}

#[derive(Debug, Serialize)]
struct Format {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// `request_{product}_{layer}_{YYYYMMDD}_{YYYYMMDD}`.
pub fn task_name(product: &str, parameter: &str, date_range: &DateRange) -> String {
    format!(
        "request_{}_{}_{}_{}",
        product,
        parameter,
        date_range.start().format("%Y%m%d"),
        date_range.end().format("%Y%m%d")
    )
}

/// Builds one task per sub-interval and layer, interval by interval.
pub fn build_tasks(
    product: &str,
    parameters: &[String],
    date_range: &DateRange,
    max_days: u32,
    bbox: &BoundingBox,
    format: OutputFormat,
) -> Result<Vec<DownloadTask>> {
    let mut tasks = Vec::new();

    for interval in date_range.partition(max_days)? {
        for parameter in parameters {
            tasks.push(DownloadTask::new(product, parameter, interval, bbox, format));
        }
    }

    Ok(tasks)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::NaiveDate;

    use super::*;

    fn january() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(42.0, 52.0, -6.0, 9.0).unwrap()
    }

    fn layers() -> Vec<String> {
        vec!["LST_Day_1km".to_string(), "LST_Night_1km".to_string()]
    }

    #[test]
    fn should_build_one_task_per_interval_and_layer() {
        let tasks = build_tasks(
            "MOD11A1.061",
            &layers(),
            &january(),
            10,
            &bbox(),
            OutputFormat::Geotiff,
        )
        .unwrap();

        assert_eq!(tasks.len(), 6);
        assert_eq!(
            tasks[0].task_name,
            "request_MOD11A1.061_LST_Day_1km_20200101_20200110"
        );
        assert_eq!(
            tasks[1].task_name,
            "request_MOD11A1.061_LST_Night_1km_20200101_20200110"
        );
        assert_eq!(
            tasks[5].task_name,
            "request_MOD11A1.061_LST_Night_1km_20200121_20200131"
        );
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert!(tasks.iter().all(|t| t.remote_id.is_none()));
    }

    #[test]
    fn should_name_tasks_deterministically() {
        let a = task_name("MOD13Q1.061", "_250m_16_days_NDVI", &january());
        let b = task_name("MOD13Q1.061", "_250m_16_days_NDVI", &january());

        assert_eq!(a, b);
        assert_eq!(a, "request_MOD13Q1.061__250m_16_days_NDVI_20200101_20200131");
    }

    #[test]
    fn should_serialise_job_description() {
        let task = DownloadTask::new(
            "MOD11A1.061",
            "LST_Day_1km",
            january(),
            &bbox(),
            OutputFormat::Geotiff,
        );
        let json = serde_json::to_value(task.request()).unwrap();

        assert_eq!(json["task_type"], "area");
        assert_eq!(json["task_name"], task.task_name);
        assert_eq!(json["params"]["dates"][0]["startDate"], "01-01-2020");
        assert_eq!(json["params"]["dates"][0]["endDate"], "01-31-2020");
        assert_eq!(json["params"]["layers"][0]["layer"], "LST_Day_1km");
        assert_eq!(json["params"]["layers"][0]["product"], "MOD11A1.061");
        assert_eq!(json["params"]["output"]["format"]["type"], "geotiff");
        assert_eq!(json["params"]["output"]["projection"], "geographic");
        assert_eq!(json["params"]["geo"]["type"], "FeatureCollection");
    }

    #[test]
    fn should_map_format_to_extension() {
        assert_eq!(OutputFormat::Geotiff.extension(), ".tif");
        assert_eq!(OutputFormat::Netcdf4.api_name(), "netcdf4");
    }
}
