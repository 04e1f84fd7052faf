mod render;

use anyhow::{anyhow, bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use dxa_core::config::{data_dir_from_env_value, reference_dir_from_env_value};
use dxa_core::import::parse_import_rows;
use dxa_core::{
    load_reference_table, ClinicService, ContactMethod, ContactRecord, CoreConfig,
    DiagnosticCalculator, FileStore, Gender, NewMeasurement, NewPatient, NonEmptyText,
    PatientRecord, RecordId, Vertebra,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dxa")]
#[command(about = "DXA bone-density clinic CLI")]
struct Cli {
    /// Clinic data directory (overrides DXA_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute YAM, T-score and diagnosis for femur and lumbar readings
    Calc {
        /// female / male (also f / m, 女性 / 男性)
        #[arg(long)]
        gender: Gender,
        #[arg(long, default_value_t = 0.0)]
        femur: f64,
        #[arg(long, default_value_t = 0.0)]
        lumbar: f64,
    },
    /// Per-vertebra lumbar analysis, e.g. `dxa vertebral --gender f L1=0.80 L2=0.90`
    Vertebral {
        #[arg(long)]
        gender: Gender,
        /// VERTEBRA=BMD pairs
        #[arg(required = true, value_parser = parse_vertebra_reading)]
        readings: Vec<(Vertebra, f64)>,
    },
    /// Register a patient
    RegisterPatient {
        /// Clinic patient code (chart number)
        code: String,
        name: String,
        gender: Gender,
        /// Date of birth (YYYY-MM-DD)
        birth_date: NaiveDate,
        #[arg(long)]
        kana: Option<String>,
    },
    /// List all patients
    ListPatients,
    /// Record a measurement and roll the follow-up schedule forward
    AddMeasurement {
        code: String,
        /// Measurement date (YYYY-MM-DD)
        date: NaiveDate,
        #[arg(long)]
        femur: Option<f64>,
        /// Direct lumbar reading
        #[arg(long, conflicts_with = "vertebra")]
        lumbar: Option<f64>,
        /// Per-vertebra reading, repeatable: --vertebra L1=0.80
        #[arg(long, value_parser = parse_vertebra_reading)]
        vertebra: Vec<(Vertebra, f64)>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a patient's measurement history, newest first
    History { code: String },
    /// List overdue follow-ups by severity
    Overdue {
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Mark a pending follow-up as completed
    Complete {
        schedule_id: String,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Record a contact attempt for a pending follow-up
    Contact {
        schedule_id: String,
        /// phone / letter / email / in_person
        method: ContactMethod,
        outcome: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Check insurance eligibility for a measurement date
    Eligibility {
        code: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Read or write system settings
    Setting {
        #[command(subcommand)]
        action: SettingAction,
    },
    /// Import measurements from a YAML list of rows
    Import { file: PathBuf },
    /// Follow-ups scheduled in a month
    Monthly { year: i32, month: u32 },
    /// Continuation statistics for a year
    Stats {
        year: i32,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum SettingAction {
    Get {
        key: String,
        #[arg(long, default_value = "")]
        default: String,
    },
    Set { key: String, value: String },
}

fn parse_vertebra_reading(raw: &str) -> Result<(Vertebra, f64), String> {
    let (label, bmd) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected VERTEBRA=BMD, got '{raw}'"))?;
    let vertebra = label.parse::<Vertebra>().map_err(|e| e.to_string())?;
    let bmd = bmd
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid BMD '{bmd}': {e}"))?;
    Ok((vertebra, bmd))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn open_service(data_dir: Option<PathBuf>) -> anyhow::Result<ClinicService<FileStore>> {
    let data_dir =
        data_dir.unwrap_or_else(|| data_dir_from_env_value(std::env::var("DXA_DATA_DIR").ok()));
    let reference_dir = reference_dir_from_env_value(std::env::var("DXA_REFERENCE_DIR").ok());
    let cfg = Arc::new(CoreConfig::new(data_dir, reference_dir)?);

    let reference = load_reference_table(&cfg);
    let calculator = Arc::new(DiagnosticCalculator::new(Arc::new(reference)));
    Ok(ClinicService::new(FileStore::new(cfg), calculator))
}

fn patient_by_code(svc: &ClinicService<FileStore>, code: &str) -> anyhow::Result<PatientRecord> {
    svc.find_patient_by_code(code)?
        .ok_or_else(|| anyhow!("no patient with code '{code}'"))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("dxa_core=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'dxa --help' for commands");
        return Ok(());
    };
    let svc = open_service(cli.data_dir)?;

    match command {
        Commands::Calc {
            gender,
            femur,
            lumbar,
        } => {
            render::print_bundle(&svc.calculate_all_metrics(femur, lumbar, gender));
        }
        Commands::Vertebral { gender, readings } => {
            match svc.calculate_vertebral_metrics(&readings, gender)? {
                Some(result) => render::print_vertebral(&result),
                None => println!("No spinal data."),
            }
        }
        Commands::RegisterPatient {
            code,
            name,
            gender,
            birth_date,
            kana,
        } => {
            let patient = svc.register_patient(NewPatient {
                patient_code: code,
                name: NonEmptyText::new(name)?,
                name_kana: kana,
                gender,
                birth_date,
            })?;
            println!("Registered patient {} ({})", patient.patient_code, patient.id);
        }
        Commands::ListPatients => {
            let patients = svc.list_patients()?;
            if patients.is_empty() {
                println!("No patients found.");
            }
            for patient in &patients {
                println!("{}", render::patient_line(patient));
            }
        }
        Commands::AddMeasurement {
            code,
            date,
            femur,
            lumbar,
            vertebra,
            notes,
        } => {
            let patient = patient_by_code(&svc, &code)?;
            let mut input = NewMeasurement::new(patient.id, date).with_femur(femur.unwrap_or(0.0));
            if let Some(bmd) = lumbar {
                input = input.with_lumbar(bmd);
            } else if !vertebra.is_empty() {
                input = input.with_vertebrae(vertebra);
            }
            if let Some(notes) = notes {
                input = input.with_notes(notes);
            }
            if !input.has_reading() {
                bail!("give at least one positive reading (--femur, --lumbar or --vertebra)");
            }
            let id = svc.add_measurement(input)?;
            println!("Saved measurement {id}");
            let next = svc
                .follow_ups(patient.id)?
                .into_iter()
                .filter(|e| e.is_pending())
                .map(|e| e.scheduled_date)
                .max();
            if let Some(next) = next {
                println!("Next follow-up: {next}");
            }
        }
        Commands::History { code } => {
            let patient = patient_by_code(&svc, &code)?;
            println!("{}", render::patient_line(&patient));
            let history = svc.measurement_history(patient.id)?;
            if history.is_empty() {
                println!("No measurements recorded.");
            }
            for m in &history {
                render::print_measurement(m);
            }
            if let Some(progression) = svc.vertebral_progression(patient.id)? {
                println!("Vertebral progression:");
                render::print_progression(&progression);
            }
        }
        Commands::Overdue { today: on } => {
            let report = svc.get_overdue_patients(on.unwrap_or_else(today))?;
            if report.is_empty() {
                println!("No overdue follow-ups.");
            }
            for (label, rows) in [
                ("URGENT", &report.urgent),
                ("WARNING", &report.warning),
                ("ATTENTION", &report.attention),
            ] {
                if rows.is_empty() {
                    continue;
                }
                println!("{label} ({})", rows.len());
                for row in rows {
                    println!("  {}", render::overdue_line(row));
                }
            }
        }
        Commands::Complete {
            schedule_id,
            today: on,
        } => {
            let id = RecordId::parse(&schedule_id)?;
            let entry = svc.complete_follow_up(id, on.unwrap_or_else(today))?;
            println!(
                "Completed follow-up {} scheduled {}",
                entry.id, entry.scheduled_date
            );
        }
        Commands::Contact {
            schedule_id,
            method,
            outcome,
            date,
            notes,
        } => {
            let id = RecordId::parse(&schedule_id)?;
            let entry = svc.record_contact(
                id,
                ContactRecord {
                    date: date.unwrap_or_else(today),
                    method,
                    outcome,
                    notes,
                },
            )?;
            println!("Recorded contact for follow-up {}", entry.id);
        }
        Commands::Eligibility { code, date } => {
            let patient = patient_by_code(&svc, &code)?;
            let result = svc.check_insurance_eligibility(patient.id, date.unwrap_or_else(today))?;
            let verdict = if result.eligible { "ELIGIBLE" } else { "NOT ELIGIBLE" };
            println!("{verdict}: {}", result.message);
        }
        Commands::Setting { action } => match action {
            SettingAction::Get { key, default } => {
                println!("{}", svc.get_system_setting(&key, &default)?);
            }
            SettingAction::Set { key, value } => {
                svc.update_system_setting(&key, &value)?;
                println!("{key} = {value}");
            }
        },
        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let rows = parse_import_rows(&text, &file.display().to_string())?;
            let summary = svc.import_measurements(&rows)?;
            println!(
                "Imported {} rows, skipped {}",
                summary.imported.len(),
                summary.skipped.len()
            );
            for skipped in &summary.skipped {
                println!(
                    "  row {}: {} {} - {}",
                    skipped.row + 1,
                    skipped.patient_code,
                    skipped.measurement_date,
                    skipped.reason
                );
            }
        }
        Commands::Monthly { year, month } => {
            let visits = svc.monthly_schedule(year, month)?;
            if visits.is_empty() {
                println!("Nothing scheduled for {year}-{month:02}.");
            }
            for visit in &visits {
                println!("{}", render::visit_line(visit));
            }
        }
        Commands::Stats { year, today: on } => {
            let stats = svc.continuation_stats(year, on.unwrap_or_else(today))?;
            println!("Year {}", stats.year);
            println!("  scheduled  {}", stats.total_scheduled);
            println!("  completed  {}", stats.completed);
            println!("  overdue    {}", stats.overdue);
            println!("  continuation rate {:.1}%", stats.continuation_rate);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vertebra_pairs() {
        assert_eq!(
            parse_vertebra_reading("l2=0.915").unwrap(),
            (Vertebra::L2, 0.915)
        );
        assert!(parse_vertebra_reading("L2").is_err());
        assert!(parse_vertebra_reading("L6=0.9").is_err());
        assert!(parse_vertebra_reading("L1=abc").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_add_measurement_with_vertebrae() {
        let cli = Cli::try_parse_from([
            "dxa",
            "add-measurement",
            "P-001",
            "2025-01-10",
            "--vertebra",
            "L1=0.80",
            "--vertebra",
            "L3=1.00",
        ])
        .expect("valid arguments");
        match cli.command {
            Some(Commands::AddMeasurement { vertebra, .. }) => {
                assert_eq!(vertebra, vec![(Vertebra::L1, 0.80), (Vertebra::L3, 1.00)]);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
