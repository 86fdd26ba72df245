//! Property-based tests for firmware staging

use fwstage::prelude::*;
use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn arb_extension() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("bin".to_string()),
        Just("BIN".to_string()),
        Just("txt".to_string()),
        Just("img".to_string()),
        "[a-z]{1,4}",
    ]
}

fn arb_file_name() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9_]{0,10}", arb_extension()).prop_map(|(stem, ext)| format!("{stem}.{ext}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_validate_accepts_iff_all_checks_pass(
        ext in arb_extension(),
        first in any::<u8>(),
        size in 0usize..2048,
        capacity in 1u64..2048,
    ) {
        let temp_dir = TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let name = format!("image.{ext}");
        let mut data = vec![0x11u8; size];
        if let Some(b) = data.first_mut() {
            *b = first;
        }
        std::fs::write(temp_dir.path().join(&name), &data)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let storage = LocalStorage::new(temp_dir.path());
        let validator = ImageValidator::new(ImageFormat::default(), capacity);
        let result = validator.validate(&storage, Path::new(&name));

        let expected = ext.eq_ignore_ascii_case("bin")
            && first == 0xE9
            && size > 0
            && size as u64 <= capacity;
        prop_assert_eq!(result.is_ok(), expected, "result: {:?}", result);
    }

    #[test]
    fn prop_operation_progress_is_monotonic(
        updates in prop::collection::vec((0u64..10_000, 0usize..5), 1..50),
    ) {
        const PHASES: [FlashPhase; 5] = [
            FlashPhase::Erasing,
            FlashPhase::Writing,
            FlashPhase::Finalizing,
            FlashPhase::Done,
            FlashPhase::Failed,
        ];

        let mut op = FlashOperation::new("firmware/app.bin");
        let mut last_bytes = 0;
        let mut last_phase = op.phase;

        for (bytes, phase_idx) in updates {
            let phase = PHASES.get(phase_idx).copied().unwrap_or(FlashPhase::Writing);
            op.apply(bytes, 5_000, phase);

            prop_assert!(op.bytes_written <= op.total);
            prop_assert!(op.bytes_written >= last_bytes);
            prop_assert!(op.phase >= last_phase);
            last_bytes = op.bytes_written;
            last_phase = op.phase;
        }
    }

    #[test]
    fn prop_scan_is_deterministic(
        names in prop::collection::btree_set(arb_file_name(), 0..20),
        max_results in 1usize..25,
    ) {
        let temp_dir = TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        for name in &names {
            std::fs::write(temp_dir.path().join(name), [0xE9u8])
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }

        let storage = LocalStorage::new(temp_dir.path());
        let scanner = StorageScanner::default();
        let first = scanner.scan(&storage, Path::new("."), max_results, false);
        let second = scanner.scan(&storage, Path::new("."), max_results, false);

        prop_assert_eq!(&first, &second);
        prop_assert!(first.len() <= max_results);
        prop_assert!(first.windows(2).all(|w| w.first().map(|c| &c.name) < w.last().map(|c| &c.name)));
        prop_assert!(first.iter().all(|c| c.name.to_ascii_lowercase().ends_with(".bin")));
    }

    #[test]
    fn prop_one_shot_fires_once(requests in 1usize..5) {
        let mut decision = BootDecisionStore::new(MemoryKvStore::new());
        for _ in 0..requests {
            decision
                .request_run_once()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }

        prop_assert!(decision.consume_and_clear());
        prop_assert!(!decision.consume_and_clear());
    }
}
