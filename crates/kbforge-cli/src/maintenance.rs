//! Health check, monitoring dashboard and the printed reports for management commands.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::warn;

use kbforge_core::{InputFolder, KbConfig, OcrCapability};
use kbforge_ingest::RunReport;
use kbforge_store::{
    validate_consistency, ConsistencyReport, DuplicateTracker, HealthStatus, KnowledgeBase,
    KnowledgeStore, SnapshotInfo, SyncReport,
};

const RULE: &str = "============================================================";
const WIDE_RULE: &str = "================================================================================";
/// Error rate (percent) above which the dashboard raises an alert.
const ERROR_RATE_ALERT: f64 = 10.0;

/// One line of the health report.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub detail: String,
}

impl ComponentCheck {
    fn new(name: impl Into<String>, status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub checks: Vec<ComponentCheck>,
    pub recommendations: Vec<String>,
}

/// Docx/pdf counts for one input folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderStats {
    pub total_files: usize,
    pub docx_files: usize,
    pub pdf_files: usize,
}

fn folder_stats(path: &Path) -> std::io::Result<FolderStats> {
    let mut stats = FolderStats::default();
    for entry in std::fs::read_dir(path)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        stats.total_files += 1;
        match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
            Some("docx") => stats.docx_files += 1,
            Some("pdf") => stats.pdf_files += 1,
            _ => {}
        }
    }
    Ok(stats)
}

fn check_folder(folder: &InputFolder) -> ComponentCheck {
    let name = format!("file_system_{}", folder.category);
    if !folder.path.is_dir() {
        return ComponentCheck::new(
            name,
            HealthStatus::Error,
            format!("{} folder not found: {}", folder.category, folder.path.display()),
        );
    }
    match folder_stats(&folder.path) {
        Ok(stats) => ComponentCheck::new(
            name,
            HealthStatus::Healthy,
            format!(
                "{} files accessible ({} docx, {} pdf)",
                stats.total_files, stats.docx_files, stats.pdf_files
            ),
        ),
        Err(e) => ComponentCheck::new(name, HealthStatus::Error, format!("cannot read folder: {}", e)),
    }
}

/// Check every component. Nothing here aborts; failures become `error` lines.
pub fn health_check(
    config: &KbConfig,
    tracker: &DuplicateTracker,
    store: &KnowledgeStore,
    ocr: &OcrCapability,
) -> HealthReport {
    let mut checks = Vec::new();
    let mut recommendations = Vec::new();

    let folders: Vec<_> = config.folders.iter().map(check_folder).collect();
    if folders.iter().any(|c| c.status == HealthStatus::Error) {
        recommendations.push("Fix file system access issues".to_string());
    }
    checks.extend(folders);

    match tracker.count() {
        Ok(n) => checks.push(ComponentCheck::new(
            "database",
            HealthStatus::Healthy,
            format!("Connected, {} files tracked", n),
        )),
        Err(e) => {
            checks.push(ComponentCheck::new(
                "database",
                HealthStatus::Error,
                format!("Database connection failed: {}", e),
            ));
            recommendations.push("Fix database connectivity issues".to_string());
        }
    }

    match store.load() {
        Ok(kb) => {
            checks.push(knowledge_base_check(&kb, &mut recommendations));
            let consistency = validate_consistency(tracker, &kb);
            checks.push(ComponentCheck::new(
                "state_consistency",
                consistency.status,
                format!(
                    "{} errors, {} warnings",
                    consistency.errors.len(),
                    consistency.warnings.len()
                ),
            ));
            recommendations.extend(consistency.errors);
            recommendations.extend(consistency.warnings);
        }
        Err(e) => {
            checks.push(ComponentCheck::new(
                "knowledge_base",
                HealthStatus::Error,
                format!("Could not load {}: {}", store.path().display(), e),
            ));
            recommendations.push("Restore the knowledge base from a snapshot with --rollback".to_string());
        }
    }

    if ocr.available {
        checks.push(ComponentCheck::new("ocr", HealthStatus::Healthy, ocr.to_string()));
    } else {
        checks.push(ComponentCheck::new(
            "ocr",
            HealthStatus::Warning,
            "OCR not available (install Tesseract for full functionality)",
        ));
        recommendations.push("Install Tesseract OCR for scanned PDF processing".to_string());
    }

    let overall = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or_default();
    HealthReport {
        overall,
        checks,
        recommendations,
    }
}

fn knowledge_base_check(kb: &KnowledgeBase, recommendations: &mut Vec<String>) -> ComponentCheck {
    if kb.is_empty() {
        recommendations.push("Run document processing to populate knowledge base".to_string());
        return ComponentCheck::new("knowledge_base", HealthStatus::Warning, "No processed documents found");
    }
    let errors = kb.error_count();
    let status = if errors > 0 {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    ComponentCheck::new(
        "knowledge_base",
        status,
        format!("{} documents stored, {} with errors", kb.len(), errors),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub total_documents: usize,
    pub tracked_files: usize,
    pub docx_files: usize,
    pub pdf_files: usize,
    pub total_segments: usize,
    pub total_tables: usize,
    pub ocr_enabled: bool,
    pub processing_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    pub avg_segments_per_doc: f64,
    pub avg_tables_per_doc: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub timestamp: NaiveDateTime,
    pub system_status: HealthStatus,
    pub metrics: DashboardMetrics,
    pub performance: Option<Performance>,
    pub components: Vec<ComponentCheck>,
    pub alerts: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn metrics(kb: &KnowledgeBase, tracked_files: usize, ocr_enabled: bool) -> DashboardMetrics {
    let entries = kb.entries.values();
    DashboardMetrics {
        total_documents: kb.len(),
        tracked_files,
        docx_files: entries.clone().filter(|e| e.format == ".docx").count(),
        pdf_files: entries.clone().filter(|e| e.format == ".pdf").count(),
        total_segments: entries.clone().map(|e| e.segment_count()).sum(),
        total_tables: entries.map(|e| e.tables.len()).sum(),
        ocr_enabled,
        processing_errors: kb.error_count(),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn performance(metrics: &DashboardMetrics) -> Option<Performance> {
    if metrics.total_documents == 0 {
        return None;
    }
    let docs = metrics.total_documents as f64;
    Some(Performance {
        avg_segments_per_doc: round1(metrics.total_segments as f64 / docs),
        avg_tables_per_doc: round1(metrics.total_tables as f64 / docs),
        error_rate: metrics.processing_errors as f64 / docs * 100.0,
    })
}

pub fn dashboard(
    config: &KbConfig,
    tracker: &DuplicateTracker,
    store: &KnowledgeStore,
    ocr: &OcrCapability,
) -> Dashboard {
    let health = health_check(config, tracker, store, ocr);
    let mut alerts = Vec::new();
    let mut recommendations = health.recommendations;

    let kb = store.load().unwrap_or_else(|e| {
        warn!("Dashboard is using an empty knowledge base: {}", e);
        alerts.push(format!("Knowledge base could not be loaded: {}", e));
        KnowledgeBase::default()
    });
    let tracked = tracker.count().unwrap_or(0);
    let metrics = metrics(&kb, tracked, ocr.available);
    let performance = performance(&metrics);

    for folder in config.folders.iter().filter(|f| !f.path.is_dir()) {
        alerts.push(format!("Folder not found: {}", folder.category));
    }
    if let Some(perf) = &performance {
        if perf.error_rate > ERROR_RATE_ALERT {
            alerts.push(format!(
                "Error rate {:.1}% exceeds {:.0}% ({} failed documents)",
                perf.error_rate, ERROR_RATE_ALERT, metrics.processing_errors
            ));
        }
    }
    if let Some(consistency) = health.checks.iter().find(|c| c.name == "state_consistency") {
        if consistency.status != HealthStatus::Healthy {
            alerts.push(format!("State consistency {}: {}", consistency.status, consistency.detail));
        }
    }
    if !ocr.available {
        recommendations.push("Install Tesseract OCR for full PDF processing".to_string());
    }
    recommendations.dedup();

    Dashboard {
        timestamp: chrono::Local::now().naive_local(),
        system_status: health.overall,
        metrics,
        performance,
        components: health.checks,
        alerts,
        recommendations,
    }
}

fn indicator(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "[OK]",
        HealthStatus::Warning => "[WARN]",
        HealthStatus::Error => "[ERROR]",
    }
}

pub fn print_health(report: &HealthReport) {
    println!("{}", RULE);
    println!("SYSTEM HEALTH CHECK RESULTS");
    println!("{}", RULE);
    println!("Overall Status: {}", report.overall.to_string().to_uppercase());
    println!();
    println!("Component Status:");
    for check in &report.checks {
        println!("  {} {}: {}", indicator(check.status), check.name, check.detail);
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }
    println!("{}", RULE);
}

pub fn print_dashboard(dashboard: &Dashboard) {
    println!("{}", WIDE_RULE);
    println!("SYSTEM MONITORING DASHBOARD");
    println!("{}", WIDE_RULE);
    println!("Timestamp: {}", dashboard.timestamp.format("%Y-%m-%dT%H:%M:%S"));
    println!("System Status: {}", dashboard.system_status.to_string().to_uppercase());

    let m = &dashboard.metrics;
    println!();
    println!("CORE METRICS:");
    println!("  total_documents: {}", m.total_documents);
    println!("  tracked_files: {}", m.tracked_files);
    println!("  docx_files: {}", m.docx_files);
    println!("  pdf_files: {}", m.pdf_files);
    println!("  total_segments: {}", m.total_segments);
    println!("  total_tables: {}", m.total_tables);
    println!("  ocr_enabled: {}", m.ocr_enabled);
    println!("  processing_errors: {}", m.processing_errors);

    if let Some(p) = &dashboard.performance {
        println!();
        println!("PERFORMANCE INDICATORS:");
        println!("  avg_segments_per_doc: {:.1}", p.avg_segments_per_doc);
        println!("  avg_tables_per_doc: {:.1}", p.avg_tables_per_doc);
        println!("  error_rate: {:.1}%", p.error_rate);
    }

    println!();
    println!("COMPONENT STATUS:");
    for c in &dashboard.components {
        println!("  {} {}: {}", indicator(c.status), c.name, c.detail);
    }
    if !dashboard.alerts.is_empty() {
        println!();
        println!("ALERTS ({}):", dashboard.alerts.len());
        for alert in &dashboard.alerts {
            println!("  [ALERT] {}", alert);
        }
    }
    if !dashboard.recommendations.is_empty() {
        println!();
        println!("RECOMMENDATIONS ({}):", dashboard.recommendations.len());
        for rec in &dashboard.recommendations {
            println!("  [TIP] {}", rec);
        }
    }
    println!("{}", WIDE_RULE);
}

pub fn print_consistency(report: &ConsistencyReport) {
    println!("{}", RULE);
    println!("STATE VALIDATION RESULTS");
    println!("{}", RULE);
    println!("Status: {}", report.status.to_string().to_uppercase());
    println!("Tracked files:      {}", report.tracked_files);
    println!("KB documents:       {}", report.kb_documents);
    for e in &report.errors {
        println!("  [ERROR] {}", e);
    }
    for w in &report.warnings {
        println!("  [WARN] {}", w);
    }
    println!("{}", RULE);
}

pub fn sync_status(report: &SyncReport) -> HealthStatus {
    if !report.errors.is_empty() {
        HealthStatus::Error
    } else if !report.warnings.is_empty() {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

pub fn print_sync(report: &SyncReport) {
    println!("{}", RULE);
    println!("STATE SYNCHRONIZATION RESULTS");
    println!("{}", RULE);
    println!("Status: {}", sync_status(report).to_string().to_uppercase());
    let sections = [
        ("Actions Taken", "[OK]", &report.actions),
        ("Warnings", "[WARN]", &report.warnings),
        ("Errors", "[ERROR]", &report.errors),
    ];
    for (title, tag, lines) in sections {
        if lines.is_empty() {
            continue;
        }
        println!();
        println!("{} ({}):", title, lines.len());
        for line in lines {
            println!("  {} {}", tag, line);
        }
    }
    println!("{}", RULE);
}

pub fn print_snapshots(snapshots: &[SnapshotInfo]) {
    println!("{}", WIDE_RULE);
    println!("AVAILABLE SNAPSHOTS");
    println!("{}", WIDE_RULE);
    if snapshots.is_empty() {
        println!("No snapshots found");
    } else {
        println!("{:<45} {:<20} {:<10}", "Filename", "Date/Time", "Size");
        println!("{}", "-".repeat(80));
        for snap in snapshots {
            let name = snap
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!(
                "{:<45} {:<20} {:>8} KB",
                name,
                snap.timestamp.format("%Y-%m-%d %H:%M:%S"),
                snap.size_bytes / 1024
            );
        }
    }
    println!("{}", WIDE_RULE);
}

pub fn print_run_summary(report: &RunReport) {
    println!("{}", RULE);
    println!("PROCESSING COMPLETED SUCCESSFULLY ({})", report.mode);
    println!("{}", RULE);
    println!("Files found:        {}", report.found);
    println!("Skipped:            {}", report.skipped);
    println!("Processed:          {}", report.processed);
    println!("Errors:             {}", report.errors);
    println!("Total in store:     {}", report.total_entries);
    println!("{}", RULE);
}
