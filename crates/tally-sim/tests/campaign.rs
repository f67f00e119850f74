use proptest::prelude::*;
use tally_sim::campaign::{CampaignConfig, run_campaign};
use tally_sim::fault::FaultConfig;
use tally_sim::{Simulation, SimulationConfig};

fn run(config: SimulationConfig) -> tally_sim::SimulationResult {
    Simulation::new(config).unwrap().run().unwrap()
}

#[test]
fn default_campaign_converges() {
    let report = run_campaign(&CampaignConfig {
        seed_range: 0..12,
        ..CampaignConfig::default()
    })
    .unwrap();
    assert!(report.all_passed(), "failures: {:#?}", report.failures);
    assert_eq!(report.seeds_run, 12);
    assert_eq!(report.seeds_passed, 12);
    assert_eq!(report.first_failure, None);
}

#[test]
fn same_seed_replays_identically() {
    let config = SimulationConfig {
        seed: 77,
        ..SimulationConfig::default()
    };
    assert_eq!(run(config.clone()), run(config));
}

#[test]
fn fault_free_run_injects_nothing() {
    let result = run(SimulationConfig {
        seed: 3,
        fault: FaultConfig::none(),
        ..SimulationConfig::default()
    });
    assert!(result.oracle.passed, "{:#?}", result.oracle.violations);
    assert!(result.faults.calls > 0);
    assert_eq!(result.faults.dropped, 0);
    assert_eq!(result.faults.timed_out, 0);
    assert_eq!(result.faults.partitioned, 0);
    assert_eq!(result.faults.server_edits, 0);
}

#[test]
fn hostile_network_still_converges() {
    let report = run_campaign(&CampaignConfig {
        seed_range: 100..106,
        devices: 4,
        rounds: 30,
        fault: FaultConfig {
            drop_rate_percent: 35,
            timeout_rate_percent: 25,
            reject_rate_percent: 10,
            partition_rate_percent: 40,
            server_edit_rate_percent: 30,
        },
        ..CampaignConfig::default()
    })
    .unwrap();
    assert!(report.all_passed(), "failures: {:#?}", report.failures);
    assert!(report.ambiguous_timeouts_seen > 0);
}

#[test]
fn single_device_converges_with_its_server() {
    let result = run(SimulationConfig {
        seed: 9,
        devices: 1,
        rounds: 60,
        ..SimulationConfig::default()
    });
    assert!(result.oracle.passed, "{:#?}", result.oracle.violations);
    assert_eq!(result.devices.len(), 1);
}

#[test]
fn zero_rounds_is_a_setup_error() {
    let err = Simulation::new(SimulationConfig {
        rounds: 0,
        ..SimulationConfig::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("rounds"));
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(16))]

    #[test]
    fn any_seed_converges(seed in any::<u64>(), devices in 1_usize..5) {
        let result = run(SimulationConfig {
            seed,
            devices,
            rounds: 15,
            ..SimulationConfig::default()
        });
        prop_assert!(result.oracle.passed, "{:#?}", result.oracle.violations);
    }
}
