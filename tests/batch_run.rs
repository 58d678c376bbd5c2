//! Batch execution integration tests.
//!
//! Covers failure isolation between batch items, pre-flight resolution
//! errors, and cancellation before dispatch.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;

use voxprep::core::{BatchError, BatchRunner};
use voxprep::domain::RunStatus;
use voxprep::{builtin_registry, ImageArtifact, PipelineConfig};

fn write_volume(dir: &Path, name: &str) -> PathBuf {
    let image = ImageArtifact::new(
        name,
        vec![4, 4, 4],
        [1.0, 1.0, 1.0],
        "RAS",
        (0..64).map(|i| i as f32).collect(),
    )
    .unwrap();
    let path = dir.join(format!("{}.vol.json", name));
    std::fs::write(&path, serde_json::to_string(&image).unwrap()).unwrap();
    path
}

fn batch_config(inputs: &[PathBuf], output: &Path) -> PipelineConfig {
    let input_list: Vec<String> = inputs
        .iter()
        .map(|p| format!("\"{}\"", p.display()))
        .collect();
    let yaml = format!(
        r#"
experiment: batch
output_dir: "{output}"
workers: 2
selected_steps: [image_loading, normalization, image_saving]

image_loading:
  enabled: true
  params:
    inputs: [{inputs}]

normalization:
  enabled: true
  methods:
    intensity: {{ enabled: true }}

image_saving:
  enabled: true
"#,
        output = output.display(),
        inputs = input_list.join(", ")
    );
    PipelineConfig::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn test_one_bad_item_does_not_stop_its_siblings() {
    let dir = TempDir::new().unwrap();
    let good_a = write_volume(dir.path(), "sub01");
    let missing = dir.path().join("sub02.vol.json");
    let good_b = write_volume(dir.path(), "sub03");
    let output = dir.path().join("out");

    let config = batch_config(&[good_a, missing, good_b], &output);
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));
    let summary = runner.run(&config).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.aborted, 1);
    assert!(!summary.all_clean());

    // Reports come back in input order regardless of completion order.
    assert_eq!(summary.reports[0].experiment_id, "batch-000-sub01");
    assert_eq!(summary.reports[1].experiment_id, "batch-001-sub02");
    assert_eq!(summary.reports[2].experiment_id, "batch-002-sub03");
    assert!(matches!(
        summary.reports[1].status,
        RunStatus::Aborted { ref step, .. } if step == "image_loading"
    ));

    // Each run persisted its own report under the shared output root.
    assert!(output.join("batch-000-sub01_report.json").exists());
    assert!(output.join("batch-001-sub02_report.json").exists());
    assert!(output.join("batch-002-sub03_report.json").exists());
}

#[tokio::test]
async fn test_same_filename_in_different_directories_does_not_collide() {
    let dir = TempDir::new().unwrap();
    let site_a = dir.path().join("site_a");
    let site_b = dir.path().join("site_b");
    std::fs::create_dir(&site_a).unwrap();
    std::fs::create_dir(&site_b).unwrap();
    let input_a = write_volume(&site_a, "sub01");
    let input_b = write_volume(&site_b, "sub01");
    let output = dir.path().join("out");

    let config = batch_config(&[input_a, input_b], &output);
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));
    let summary = runner.run(&config).await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_ne!(
        summary.reports[0].experiment_id,
        summary.reports[1].experiment_id
    );

    // Both runs keep their own report file in the shared output root.
    let reports: Vec<_> = std::fs::read_dir(&output)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with("_report.json"))
        .collect();
    assert_eq!(reports.len(), 2);
}

#[tokio::test]
async fn test_resolution_failure_happens_before_any_run() {
    let yaml = r#"
selected_steps: [image_loading, skull_stripping]
image_loading:
  enabled: true
  params:
    inputs: ["data"]
skull_stripping: { enabled: true }
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));

    let err = runner.run(&config).await.unwrap_err();
    assert!(matches!(err, BatchError::Resolve(_)));
}

#[tokio::test]
async fn test_plan_without_loading_step_is_rejected() {
    let yaml = r#"
selected_steps: [image_saving]
image_saving: { enabled: true }
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));

    let err = runner.run(&config).await.unwrap_err();
    assert!(matches!(err, BatchError::NoLoadStep));
}

#[tokio::test]
async fn test_cancellation_before_dispatch_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let input = write_volume(dir.path(), "sub01");
    let output = dir.path().join("out");

    let config = batch_config(&[input], &output);
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));
    runner.cancel_handle().store(true, Ordering::SeqCst);

    let summary = runner.run(&config).await.unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_directory_input_discovers_every_volume() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir(&data).unwrap();
    write_volume(&data, "sub01");
    write_volume(&data, "sub02");
    std::fs::write(data.join("README.txt"), "not a volume").unwrap();
    let output = dir.path().join("out");

    let config = batch_config(&[data], &output);
    let runner = BatchRunner::new(Arc::new(builtin_registry().unwrap()));
    let summary = runner.run(&config).await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert!(summary.all_clean());
}
