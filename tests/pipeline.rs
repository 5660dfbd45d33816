//! End-to-end preparation tests: raw folders in, persisted splits out

use std::path::Path;
use std::sync::Once;

use burn::data::dataset::Dataset;
use ginger_dataset::dataset::validator::ValidatorConfig;
use ginger_dataset::utils::{init_logging, LogConfig};
use ginger_dataset::{
    ClassList, DatasetError, ImageValidator, InvalidReason, PipelineConfig, PipelineState,
    PreparationSession, SplitReader, Subset, Validation,
};
use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn write_noise_image(path: &Path, width: u32, height: u32, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let img = RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(path).unwrap();
}

fn raw_tree(root: &Path, counts: &[(&str, u64)]) {
    for (class, n) in counts {
        for i in 0..*n {
            let path = root.join(class).join(format!("IMG_{:04}.png", i));
            write_noise_image(&path, 72, 72, i * 31 + class.len() as u64);
        }
    }
}

static LOGGING: Once = Once::new();

fn test_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::with_root(root);
    config.logging = LogConfig {
        ansi_colors: false,
        ..LogConfig::quiet()
    };
    LOGGING.call_once(|| init_logging(&config.logging).unwrap());
    config.validator = ValidatorConfig {
        min_width: 64,
        min_height: 64,
        ..Default::default()
    };
    config.augmentation = config.augmentation.with_target_size(32, 32);
    config
}

#[test]
fn test_reference_scenario_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    raw_tree(&raw, &[("healthy", 10), ("leaf_spot", 3)]);
    // One rejected file in the source
    std::fs::write(raw.join("healthy/broken.jpg"), vec![0u8; 4096]).unwrap();

    let config = test_config(tmp.path());
    let classes = config.classes.clone();
    let mut session = PreparationSession::new(config).unwrap();
    let report = session.run(&raw).unwrap();

    assert_eq!(session.state(), PipelineState::Persisted);
    assert_eq!(report.total_copied(), 13);
    assert_eq!(report.validation.total_invalid(), 1);
    assert_eq!(report.manifest.count("healthy"), 10);
    assert_eq!(report.manifest.count("leaf_spot"), 3);
    assert_eq!(report.manifest.total_images, 13);

    let healthy = classes.index_of("healthy").unwrap();
    let leaf_spot = classes.index_of("leaf_spot").unwrap();
    let assignment = session.assignment().unwrap();
    let count = |subset, label| assignment.class_counts(subset, classes.len())[label];

    assert_eq!(count(Subset::Train, healthy), 6);
    assert_eq!(count(Subset::Validation, healthy), 2);
    assert_eq!(count(Subset::Test, healthy), 2);

    let leaf_total: usize = Subset::ALL.iter().map(|&s| count(s, leaf_spot)).sum();
    assert_eq!(leaf_total, 3);
    assert!(count(Subset::Train, leaf_spot) >= 1);

    // Files on disk
    let split_dir = tmp.path().join("splits");
    for name in ["train.json", "validation.json", "test.json", "class_weights.json"] {
        assert!(split_dir.join(name).is_file(), "{} missing", name);
    }
    assert!(tmp.path().join("processed/dataset_info.json").is_file());
    assert!(tmp.path().join("processed/healthy/healthy_00009.png").is_file());

    // Classes without any image get the default weight
    let weights = session.class_weights().unwrap();
    assert_eq!(weights.get_by_name("soft_rot"), Some(1.0));
    assert!(weights.get_by_name("leaf_spot").unwrap() > weights.get_by_name("healthy").unwrap());

    // Reading back gives the same assignment
    let persisted = SplitReader::read(&split_dir).unwrap();
    assert_eq!(&persisted.assignment, assignment);
}

#[test]
fn test_prepared_dataset_serves_items() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    raw_tree(&raw, &[("healthy", 6), ("bacterial_wilt", 6)]);

    let mut session = PreparationSession::new(test_config(tmp.path())).unwrap();
    session.run(&raw).unwrap();
    let prepared = session.open_prepared().unwrap();

    let train = prepared.subset(Subset::Train, 0);
    let test = prepared.subset(Subset::Test, 0);
    assert_eq!(
        train.len() + prepared.subset(Subset::Validation, 0).len() + test.len(),
        12
    );

    let item = train.get(0).unwrap();
    assert_eq!(item.image.len(), 3 * 32 * 32);
    assert!(item.label < prepared.classes().len());
    assert_eq!(prepared.class_weights().weights().len(), 7);

    // Evaluation items do not depend on the epoch
    assert_eq!(
        test.get(0).unwrap().image,
        prepared.subset(Subset::Test, 9).get(0).unwrap().image
    );
}

#[test]
fn test_split_is_reproducible_after_resume() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    raw_tree(&raw, &[("healthy", 12), ("rhizome_rot", 7), ("yellow_disease", 4)]);

    let mut first = PreparationSession::new(test_config(tmp.path())).unwrap();
    first.organize(&raw).unwrap();
    let a = first.split().unwrap().clone();

    let mut second = PreparationSession::resume(test_config(tmp.path())).unwrap();
    assert_eq!(second.state(), PipelineState::Organized);
    let b = second.split().unwrap().clone();
    assert_eq!(a, b);
}

#[test]
fn test_missing_source_root() {
    let tmp = tempfile::tempdir().unwrap();
    let mut session = PreparationSession::new(test_config(tmp.path())).unwrap();

    let result = session.organize(&tmp.path().join("does_not_exist"));
    assert!(matches!(result, Err(DatasetError::SourceNotFound(_))));
    assert_eq!(session.state(), PipelineState::Unsplit);
    assert!(!tmp.path().join("processed").exists());
}

#[test]
fn test_low_resolution_image_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("small.png");
    // Smooth gradient keeps the file small but above 1 KiB
    let img = RgbImage::from_fn(100, 100, |x, y| {
        Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8])
    });
    img.save(&path).unwrap();

    let outcome = ImageValidator::new(ValidatorConfig::default()).validate(&path);
    match outcome {
        Validation::Invalid(InvalidReason::ResolutionTooLow { width, height, .. }) => {
            assert_eq!((width, height), (100, 100));
        }
        other => panic!("expected ResolutionTooLow, got {:?}", other),
    }
}

#[test]
fn test_export_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    raw_tree(&raw, &[("healthy", 5), ("soft_rot", 5)]);

    let mut config = test_config(tmp.path());
    config.classes = ClassList::new(["healthy", "soft_rot"]).unwrap();
    let mut session = PreparationSession::new(config).unwrap();
    session.organize(&raw).unwrap();
    session.split().unwrap();

    let out = tmp.path().join("cnn_data");
    let summary = session.export_directories(&out).unwrap();
    assert_eq!(summary.total(), 10);
    assert_eq!(summary.count(Subset::Train, 0), 3);
    assert_eq!(std::fs::read_dir(out.join("train/healthy")).unwrap().count(), 3);
}

#[test]
fn test_logging_installs_once() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    // test_config already installed the global subscriber
    assert!(matches!(init_logging(&config.logging), Err(DatasetError::Config(_))));
}
