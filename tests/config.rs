// ABOUTME: Integration tests for plan parsing and validation.
// ABOUTME: Tests YAML parsing, defaults, env interpolation and plan discovery.

use rollstack::config::*;
use rollstack::error::Error;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const TWO_STEPS: &str = r#"
bucket: deploys
region: eu-west-1
steps:
  - stack: api
    forward:
      template: api/v2.json
    backward:
      template: api/v1.json
  - stack: auth
    forward:
      template: auth/v2.json
      tables: [Users-prod]
    backward:
      template: auth/v1.json
      tables: [Users-prod]
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_plan() {
        let plan = Plan::from_yaml(TWO_STEPS).unwrap();
        assert_eq!(plan.bucket, "deploys");
        assert_eq!(plan.region, "eu-west-1");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.name(), "api");
    }

    #[test]
    fn defaults_apply() {
        let plan = Plan::from_yaml(TWO_STEPS).unwrap();
        assert_eq!(plan.polling, PollingConfig::default());
        assert_eq!(plan.polling.interval, Duration::from_secs(5));
        assert_eq!(plan.polling.stability_timeout, Duration::from_secs(3600));
        assert_eq!(plan.polling.readiness_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(plan.state_dir, Path::new(".rollstack/state"));
    }

    #[test]
    fn parse_polling_overrides() {
        let yaml = format!(
            "{TWO_STEPS}\npolling:\n  interval: 2s\n  readiness_timeout: null\n  requests_per_minute: 10\n"
        );
        let plan = Plan::from_yaml(&yaml).unwrap();
        assert_eq!(plan.polling.interval, Duration::from_secs(2));
        assert_eq!(plan.polling.readiness_timeout, None);
        assert_eq!(plan.polling.requests_per_minute, 10);
        assert_eq!(plan.polling.event_interval, Duration::from_secs(5));
    }

    #[test]
    fn settings_carry_bucket_region_and_polling() {
        let yaml = format!("{TWO_STEPS}\npolling:\n  stability_timeout: 90s\n");
        let plan = Plan::from_yaml(&yaml).unwrap();

        let settings = plan.settings();
        assert_eq!(settings.bucket, "deploys");
        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.polling, plan.polling);
        assert_eq!(settings.polling.stability_timeout, Duration::from_secs(90));
    }

    #[test]
    fn explicit_name_wins() {
        let yaml = format!("name: release-42\n{TWO_STEPS}");
        let plan = Plan::from_yaml(&yaml).unwrap();
        assert_eq!(plan.name(), "release-42");
    }

    #[test]
    fn steps_are_required() {
        let yaml = "bucket: deploys\nregion: eu-west-1\nsteps: []\n";
        let err = Plan::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = format!("{TWO_STEPS}\nretries: 3\n");
        assert!(matches!(Plan::from_yaml(&yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let yaml = TWO_STEPS.replace("bucket: deploys", "bucket: \"\"");
        assert!(matches!(Plan::from_yaml(&yaml), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn invalid_stack_name_is_rejected() {
        let yaml = TWO_STEPS.replace("stack: api", "stack: 1api");
        assert!(matches!(Plan::from_yaml(&yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn plan_name_cannot_be_a_path() {
        let yaml = format!("name: ../elsewhere\n{TWO_STEPS}");
        assert!(matches!(Plan::from_yaml(&yaml), Err(Error::InvalidConfig(_))));
    }
}

mod sequence {
    use super::*;

    #[test]
    fn builds_steps_in_order() {
        let plan = Plan::from_yaml(TWO_STEPS).unwrap();
        let sequence = plan.sequence().unwrap();

        let stacks: Vec<&str> = sequence.iter().map(|step| step.stack().as_str()).collect();
        assert_eq!(stacks, ["api", "auth"]);

        let auth = sequence.get(1).unwrap();
        assert_eq!(auth.forward().template().path(), "auth/v2.json");
        assert_eq!(
            auth.backward().template().url(),
            "https://deploys.s3.eu-west-1.amazonaws.com/auth/v1.json"
        );
        assert!(auth.forward().has_tables());
        assert!(!sequence.get(0).unwrap().forward().has_tables());
    }

    #[test]
    fn empty_template_is_rejected() {
        let yaml = TWO_STEPS.replace("template: api/v1.json", "template: \"\"");
        let plan = Plan::from_yaml(&yaml).unwrap();
        assert!(matches!(plan.sequence(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn parameters_resolve_from_environment() {
        let yaml = r#"
bucket: deploys
region: eu-west-1
steps:
  - stack: api
    forward:
      template: api/v2.json
      parameters:
        Stage: prod
        Version:
          env: ROLLSTACK_TEST_VERSION
        Owner:
          env: ROLLSTACK_TEST_MISSING_OWNER
          default: platform
      capabilities: [CAPABILITY_IAM]
      idempotency_token: release-42
    backward:
      template: api/v1.json
"#;
        let plan = Plan::from_yaml(yaml).unwrap();

        temp_env::with_var("ROLLSTACK_TEST_VERSION", Some("2.0.1"), || {
            let sequence = plan.sequence().unwrap();
            let forward = sequence.get(0).unwrap().forward();

            let expected: BTreeMap<String, String> = [
                ("Owner", "platform"),
                ("Stage", "prod"),
                ("Version", "2.0.1"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
            assert_eq!(forward.parameters(), &expected);
            assert_eq!(forward.capabilities(), ["CAPABILITY_IAM"]);
            assert_eq!(forward.idempotency_token(), Some("release-42"));
        });
    }

    #[test]
    fn missing_environment_variable_fails() {
        let yaml = r#"
bucket: deploys
region: eu-west-1
steps:
  - stack: api
    forward:
      template: api/v2.json
      parameters:
        Version:
          env: ROLLSTACK_TEST_UNSET_VERSION
    backward:
      template: api/v1.json
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        temp_env::with_var_unset("ROLLSTACK_TEST_UNSET_VERSION", || {
            assert!(matches!(
                plan.sequence(),
                Err(Error::MissingEnvVar(var)) if var == "ROLLSTACK_TEST_UNSET_VERSION"
            ));
        });
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discovers_plan_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rollstack.yaml"), TWO_STEPS).unwrap();

        let plan = Plan::discover(dir.path()).unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn discovers_plan_in_hidden_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".rollstack")).unwrap();
        std::fs::write(dir.path().join(".rollstack/plan.yml"), TWO_STEPS).unwrap();

        assert!(Plan::discover(dir.path()).is_ok());
    }

    #[test]
    fn missing_plan_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Plan::discover(dir.path()),
            Err(Error::PlanNotFound(_))
        ));
    }

    #[test]
    fn explicit_path_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        std::fs::write(&path, TWO_STEPS).unwrap();

        let plan = Plan::resolve(Some(&path), Path::new("/nonexistent")).unwrap();
        assert_eq!(plan.name(), "api");
    }

    #[test]
    fn state_dir_is_relative_to_base() {
        let plan = Plan::from_yaml(TWO_STEPS).unwrap();
        assert_eq!(
            plan.state_dir_in(Path::new("/work")),
            Path::new("/work/.rollstack/state")
        );
    }

    #[test]
    fn init_writes_a_valid_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_plan(dir.path(), false).unwrap();
        assert!(path.ends_with(PLAN_FILENAME));
        assert!(Plan::discover(dir.path()).is_ok());
    }
}
