//! # CLI Integration Tests
//!
//! This module provides tests for the command-line interface, covering argument
//! parsing of every subcommand, global flags and error handling scenarios.

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use clap_complete::Shell;
    use std::path::PathBuf;

    use crate::cli::{Cli, Commands, ConfigFormat, OutputFormat, build_run_config};

    /// Test basic CLI argument parsing
    #[test]
    fn test_cli_help() {
        let result = Cli::try_parse_from(["rainfall-indices", "--help"]);
        assert!(result.is_err()); // --help causes early exit with "error"

        let error = result.unwrap_err();
        assert!(error.to_string().contains("PRCPTOT"));
    }

    /// Test version argument
    #[test]
    fn test_cli_version() {
        let result = Cli::try_parse_from(["rainfall-indices", "--version"]);
        assert!(result.is_err()); // --version causes early exit
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    /// Test global flags
    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "--verbose",
            "--output-format",
            "json",
            "--config",
            "/path/to/run.yaml",
            "template",
        ]);

        assert!(cli.verbose);
        assert_eq!(cli.quiet, 0);
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/run.yaml")));
    }

    #[test]
    fn test_quiet_flag_counts() {
        let cli = Cli::parse_from(["rainfall-indices", "-qq", "template"]);
        assert_eq!(cli.quiet, 2);
        assert!(!cli.verbose);
        assert_eq!(cli.output_format, OutputFormat::Human);
    }

    /// Global flags are accepted after the subcommand too
    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["rainfall-indices", "template", "-v", "-q"]);
        assert!(cli.verbose);
        assert_eq!(cli.quiet, 1);
    }

    #[test]
    fn test_consolidate_command_basic() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "consolidate",
            "cities.json",
            "grids/",
            "-p",
            "-k",
        ]);

        if let Commands::Consolidate(args) = &cli.command {
            assert_eq!(args.coordinates, Some(PathBuf::from("cities.json")));
            assert_eq!(args.source_dir, Some(PathBuf::from("grids/")));
            assert!(args.to_parquet);
            assert!(args.keep_temp);
            assert!(!args.raw_coordinates);
            assert!(!args.dry_run);
        } else {
            panic!("Expected Consolidate command");
        }
    }

    #[test]
    fn test_consolidate_command_all_flags() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "consolidate",
            "cities.csv",
            "grids",
            "-r",
            "-c",
            "-n",
            "--no-recovery",
            "--restrict-to-period",
            "--dry-run",
            "--models",
            "MIROC6,KACE",
            "--scenarios",
            "SSP245",
            "--variable",
            "precip",
        ]);

        if let Commands::Consolidate(args) = &cli.command {
            assert!(args.raw_coordinates);
            assert!(args.to_csv);
            assert!(args.to_netuno);
            assert!(args.no_recovery);
            assert!(args.restrict_to_period);
            assert!(args.dry_run);
            assert_eq!(args.models, vec!["MIROC6".to_string(), "KACE".to_string()]);
            assert_eq!(args.scenarios, vec!["SSP245".to_string()]);
            assert_eq!(args.variable, Some("precip".to_string()));
        } else {
            panic!("Expected Consolidate command");
        }
    }

    /// Parsed arguments flow into the run configuration
    #[test]
    fn test_consolidate_arguments_to_run_config() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "consolidate",
            "cities.json",
            "data/grids",
            "--scenarios",
            "SSP585",
            "--models",
            "NESM3",
            "-n",
        ]);

        let Commands::Consolidate(args) = &cli.command else {
            panic!("Expected Consolidate command");
        };
        let config = build_run_config(cli.config.as_deref(), args).unwrap();
        assert_eq!(config.models, vec!["NESM3".to_string()]);
        assert_eq!(config.scenarios.len(), 1);
        assert_eq!(config.scenarios[0].file_name("NESM3"), "NESM3-pr-ssp585.nc");
        assert!(config.outputs.netuno);
        assert_eq!(config.output_parent(), PathBuf::from("data"));
    }

    /// `-r` restricts the consolidate command to coordinate resolution
    #[test]
    fn test_raw_coordinates_help() {
        let mut command = Cli::command();
        let help = command
            .find_subcommand_mut("consolidate")
            .unwrap()
            .render_long_help()
            .to_string();

        assert!(help.contains("without consolidating"));
        assert!(help.contains("Overrides --to-parquet, --to-csv and --to-netuno"));
    }

    #[test]
    fn test_resolve_command() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "resolve",
            "cities.csv",
            "grids",
            "-o",
            "resolved.json",
        ]);

        if let Commands::Resolve {
            coordinates,
            source_dir,
            output,
            ..
        } = &cli.command
        {
            assert_eq!(coordinates, &PathBuf::from("cities.csv"));
            assert_eq!(source_dir, &PathBuf::from("grids"));
            assert_eq!(output, &Some(PathBuf::from("resolved.json")));
        } else {
            panic!("Expected Resolve command");
        }
    }

    #[test]
    fn test_inspect_command() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "inspect",
            "grid.nc",
            "-n",
            "precip",
            "--format",
            "yaml",
        ]);

        if let Commands::Inspect {
            file,
            variable,
            format,
        } = &cli.command
        {
            assert_eq!(file, &PathBuf::from("grid.nc"));
            assert_eq!(variable, "precip");
            assert_eq!(format, &Some(OutputFormat::Yaml));
        } else {
            panic!("Expected Inspect command");
        }
    }

    #[test]
    fn test_inspect_command_defaults() {
        let cli = Cli::parse_from(["rainfall-indices", "inspect", "grid.nc"]);

        if let Commands::Inspect {
            variable, format, ..
        } = &cli.command
        {
            assert_eq!(variable, "pr");
            assert_eq!(format, &None);
        } else {
            panic!("Expected Inspect command");
        }
    }

    #[test]
    fn test_template_command() {
        let cli = Cli::parse_from([
            "rainfall-indices",
            "template",
            "--format",
            "yaml",
            "-o",
            "run.yaml",
        ]);

        if let Commands::Template { output, format } = &cli.command {
            assert_eq!(output, &Some(PathBuf::from("run.yaml")));
            assert_eq!(format, &ConfigFormat::Yaml);
        } else {
            panic!("Expected Template command");
        }

        let cli = Cli::parse_from(["rainfall-indices", "template"]);
        if let Commands::Template { output, format } = &cli.command {
            assert_eq!(output, &None);
            assert_eq!(format, &ConfigFormat::Json);
        } else {
            panic!("Expected Template command");
        }
    }

    #[test]
    fn test_completions_command() {
        let cli = Cli::parse_from(["rainfall-indices", "completions", "zsh"]);

        if let Commands::Completions { shell, output } = &cli.command {
            assert_eq!(*shell, Shell::Zsh);
            assert_eq!(output, &None);
        } else {
            panic!("Expected Completions command");
        }
    }

    #[test]
    fn test_completions_generation() {
        let mut command = Cli::command();
        let mut buffer = Vec::new();
        clap_complete::generate(Shell::Bash, &mut command, "rainfall-indices", &mut buffer);

        let script = String::from_utf8(buffer).unwrap();
        assert!(script.contains("consolidate"));
        assert!(script.contains("--to-parquet"));
    }

    /// Test error handling for invalid arguments
    #[test]
    fn test_invalid_arguments() {
        // Missing subcommand
        assert!(Cli::try_parse_from(["rainfall-indices"]).is_err());

        // Unknown output format
        assert!(
            Cli::try_parse_from(["rainfall-indices", "--output-format", "xml", "template"])
                .is_err()
        );

        // Unknown shell
        assert!(Cli::try_parse_from(["rainfall-indices", "completions", "tcsh"]).is_err());

        // Inspect requires a file
        assert!(Cli::try_parse_from(["rainfall-indices", "inspect"]).is_err());
    }
}
