//! Plain-text output for the CLI.

use dxa_core::calculator::SiteMetrics;
use dxa_core::schedule::{OverdueEntry, ScheduledVisit};
use dxa_core::vertebral::{VertebraProgression, VertebralResult};
use dxa_core::{MeasurementRecord, MetricsBundle, PatientRecord};

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

pub fn site_line(label: &str, metrics: Option<&SiteMetrics>) -> String {
    match metrics {
        None => format!("{label:<8} not measured"),
        Some(m) => format!(
            "{label:<8} BMD {:.3}  YAM {}%  T {}  {}",
            m.bmd,
            opt(m.yam),
            opt(m.tscore),
            m.diagnosis
        ),
    }
}

pub fn print_bundle(bundle: &MetricsBundle) {
    println!("{}", site_line("femur", bundle.femur.as_ref()));
    println!("{}", site_line("lumbar", bundle.lumbar.as_ref()));
    println!("overall  {}", bundle.overall_diagnosis);
}

pub fn print_vertebral(result: &VertebralResult) {
    for v in &result.vertebrae {
        println!(
            "{:<8} BMD {:.3}  YAM {}%  T {}  {}",
            v.vertebra.as_str(),
            v.bmd,
            opt(v.yam),
            opt(v.tscore),
            v.diagnosis
        );
    }
    println!(
        "{:<8} BMD {:.3}  YAM {}%  T {}  {}",
        "average",
        result.average.bmd,
        opt(result.average.yam),
        opt(result.average.tscore),
        result.average.diagnosis
    );

    let Some(analysis) = &result.analysis else {
        return;
    };
    println!(
        "BMD spread {:.3} ({} lowest, {} highest)",
        analysis.bmd.range, analysis.bmd.lowest, analysis.bmd.highest
    );
    for risk in &analysis.risk.high_risk {
        println!("  high risk: {} (YAM {:.1}%)", risk.vertebra, risk.yam);
    }
    for risk in &analysis.risk.moderate_risk {
        println!("  moderate risk: {} (YAM {:.1}%)", risk.vertebra, risk.yam);
    }
    for point in &analysis.risk.attention_points {
        println!("  note: {point}");
    }
}

pub fn patient_line(p: &PatientRecord) -> String {
    format!(
        "{}  {:<10} {}  {}  born {}",
        p.id, p.patient_code, p.name, p.gender, p.birth_date
    )
}

pub fn print_measurement(m: &MeasurementRecord) {
    println!("{}  {}  overall {}", m.measurement_date, m.id, m.overall_diagnosis);
    println!("  {}", site_line("femur", m.femur.as_ref()));
    println!("  {}", site_line("lumbar", m.lumbar.as_ref()));
    for v in &m.vertebrae {
        println!("    {} BMD {:.3} YAM {}%", v.vertebra, v.bmd, opt(v.yam));
    }
    if let Some(notes) = &m.notes {
        println!("  notes: {notes}");
    }
}

pub fn print_progression(rows: &[VertebraProgression]) {
    for row in rows {
        println!(
            "  {} {:.3} -> {:.3} ({:+.3}) {:?}",
            row.vertebra, row.previous_bmd, row.current_bmd, row.bmd_change, row.trend
        );
    }
}

pub fn overdue_line(entry: &OverdueEntry) -> String {
    format!(
        "{}  {:<10} {}  scheduled {}  {} days{}",
        entry.schedule_id,
        entry.patient.patient_code,
        entry.patient.name,
        entry.scheduled_date,
        entry.days_overdue,
        if entry.contacted { "  (contacted)" } else { "" }
    )
}

pub fn visit_line(visit: &ScheduledVisit) -> String {
    format!(
        "{}  {}  {:<10} {}  {:?}",
        visit.entry.scheduled_date,
        visit.entry.id,
        visit.patient.patient_code,
        visit.patient.name,
        visit.entry.status
    )
}
