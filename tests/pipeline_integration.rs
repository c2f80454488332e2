//! End-to-end join runs through the library API with real subprocesses.

use mrpipe::config::{ExternalCommand, PipelineConfig, StageSpec};
use mrpipe::skew::NormalizationMode;
use mrpipe::subprocess::production_runner;
use mrpipe::{JobName, Pipeline};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn setup(activity: &str, profiles: &str) -> (TempDir, PipelineConfig) {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("data");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("user_activity.txt"), activity).unwrap();
    fs::write(input.join("user_profiles.txt"), profiles).unwrap();

    let config = PipelineConfig {
        input_dir: input,
        output_dir: temp.path().join("output"),
        ..PipelineConfig::default()
    };
    (temp, config)
}

fn read_joined(config: &PipelineConfig) -> String {
    fs::read_to_string(config.output_dir.join("joined_data.txt")).unwrap()
}

#[tokio::test]
async fn test_salted_hot_key_joins_once() {
    let (temp, mut config) = setup("hot\tx\n", "hot,Ann,Oslo\n");
    let analysis = temp.path().join("skew_analysis.json");
    fs::write(&analysis, r#"{"skewed_keys": ["hot"], "total_records": 1}"#).unwrap();
    config.skew.profile = Some(analysis);
    config.skew.num_salts = 3;

    let pipeline = Pipeline::new(config.clone(), production_runner());
    let report = pipeline.run(JobName::Join).await.unwrap();

    assert_eq!(read_joined(&config), "hot\thot,Ann,Oslo\tx\n");
    assert_eq!(report.jobs[0].records, 1);
}

#[tokio::test]
async fn test_external_reducer_sees_salted_sorted_stream() {
    let (_temp, mut config) = setup("hot\tx\ncold\ty\n", "hot,Ann\ncold,Bo\n");
    config.skew.skewed_keys = vec!["hot".to_string()];
    config.skew.num_salts = 3;
    config.jobs.join.reducer = StageSpec::External(ExternalCommand {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "cat; echo \"keys=${skewed_keys_env}\"".to_string(),
        ],
        env: BTreeMap::from([("skewed_keys_env".to_string(), "passed".to_string())]),
    });

    let pipeline = Pipeline::new(config.clone(), production_runner());
    pipeline.run(JobName::Join).await.unwrap();

    let lines: Vec<String> = read_joined(&config).lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "cold\tA:y",
            "cold\tP:cold,Bo",
            "hot_0\tA:x",
            "hot_0\tP:hot,Ann",
            "hot_1\tA:x",
            "hot_1\tP:hot,Ann",
            "hot_2\tA:x",
            "hot_2\tP:hot,Ann",
            "keys=passed",
        ]
    );
}

#[tokio::test]
async fn test_skew_aware_normalization_keeps_underscore_keys_apart() {
    let (_temp, mut config) = setup("user_2\tposts:1\n", "user_1,Ann\n");
    config.skew.skewed_keys = vec!["hot".to_string()];

    let pipeline = Pipeline::new(config.clone(), production_runner());
    pipeline.run(JobName::Join).await.unwrap();
    assert_eq!(read_joined(&config), "");

    // Truncating at the first delimiter merges the two users into "user".
    config.skew.normalization = NormalizationMode::FirstDelimiter;
    let pipeline = Pipeline::new(config.clone(), production_runner());
    pipeline.run(JobName::Join).await.unwrap();
    assert_eq!(read_joined(&config), "user\tuser_1,Ann\tposts:1\n");
}

#[tokio::test]
async fn test_empty_inputs_produce_empty_output() {
    let (_temp, config) = setup("", "");
    let pipeline = Pipeline::new(config.clone(), production_runner());
    let report = pipeline.run(JobName::Join).await.unwrap();

    assert_eq!(read_joined(&config), "");
    assert_eq!(report.jobs[0].records, 0);
}
