//! Report Module - Shutdown Findings
//!
//! Drains the profiler's registries into one [`Report`]: the top objects
//! with their worst cache lines, the escalated pages with their locality
//! splits, the allocation-site aggregates, the contended locks, and the
//! event-counter footer. The same structure renders as line-oriented text
//! or as JSON, to whatever file descriptor the configuration names.
//!
//! Report building runs once, after the workload quiesces; unlike the
//! access path it may allocate and log freely.

pub mod diagnosis;
pub mod queue;
pub mod score;

pub use diagnosis::{CacheLineFinding, DiagnosisBuilder, ObjectDiagnosis};
pub use queue::BoundedPriorityQueue;

use crate::error::{NlensError, Result};
use crate::pipeline::Profiler;
use indexmap::IndexMap;
use serde::Serialize;
use std::io::Write;

/// One escalated page in the page-sharing section.
#[derive(Debug, Clone, Serialize)]
pub struct PageFinding {
    pub page_base: usize,
    pub first_touch_thread: u32,
    pub foreign_accesses: u64,
    pub reads_local: u64,
    pub reads_remote: u64,
    pub writes_local: u64,
    pub writes_remote: u64,
}

/// One allocation site's lifetime aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct SiteFinding {
    pub fingerprint: u64,
    pub objects_allocated: u64,
    pub objects_freed: u64,
    pub bytes_allocated: u64,
    pub accesses_by_alloc_thread: u64,
    pub accesses_by_others: u64,
    pub invalidations: u64,
}

/// One contended lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockFinding {
    pub lock_address: usize,
    pub contended_acquires: u64,
}

/// Effective configuration echoed into the report header.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEcho {
    pub page_detail_threshold: u64,
    pub cache_detail_threshold: u32,
    pub top_objects: usize,
    pub top_cache_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportHeader {
    pub version: &'static str,
    pub generated_at: String,
    pub config: ConfigEcho,
}

/// Report - everything the profiler learned, ready to render
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub header: ReportHeader,
    pub objects: Vec<ObjectDiagnosis>,
    pub pages: Vec<PageFinding>,
    pub sites: Vec<SiteFinding>,
    pub locks: Vec<LockFinding>,
    pub counters: IndexMap<&'static str, u64>,
}

/// Build the report from a quiesced profiler.
///
/// Still-live objects are merged into their sites here (frees already
/// merged themselves), so short-lived and long-lived objects rank on equal
/// footing in the site section.
pub fn build_report(profiler: &Profiler) -> Report {
    let config = profiler.config();

    // Site aggregates: fold the survivors in first
    profiler.for_each_object(|object| {
        profiler.merge_live_object(object);
    });

    let mut top_objects = BoundedPriorityQueue::new(config.top_objects);
    profiler.for_each_object(|object| {
        let mut builder = DiagnosisBuilder::new(object, config.top_cache_lines);
        profiler.lines_of_range(object.start_address(), object.size(), |line| {
            builder.add_line(line);
        });
        if !builder.is_quiet() {
            let score = builder.score();
            top_objects.insert(score, builder.finish());
        }
    });

    let mut pages = Vec::new();
    profiler.for_each_escalated_page(|page_base, record, detail| {
        pages.push(PageFinding {
            page_base,
            first_touch_thread: record.first_touch_thread(),
            foreign_accesses: record.foreign_accesses(),
            reads_local: detail.reads_local(),
            reads_remote: detail.reads_remote(),
            writes_local: detail.writes_local(),
            writes_remote: detail.writes_remote(),
        });
    });
    pages.sort_by(|a, b| {
        (b.reads_remote + b.writes_remote).cmp(&(a.reads_remote + a.writes_remote))
    });

    let mut sites = Vec::new();
    profiler.for_each_site(|site| {
        sites.push(SiteFinding {
            fingerprint: site.fingerprint(),
            objects_allocated: site.objects_allocated(),
            objects_freed: site.objects_freed(),
            bytes_allocated: site.bytes_allocated(),
            accesses_by_alloc_thread: site.accesses_by_alloc_thread(),
            accesses_by_others: site.accesses_by_others(),
            invalidations: site.invalidations(),
        });
    });
    sites.sort_by(|a, b| {
        (b.invalidations, b.accesses_by_others).cmp(&(a.invalidations, a.accesses_by_others))
    });

    let mut locks = Vec::new();
    profiler.for_each_lock(|lock_address, record| {
        let contended_acquires = record.contended_acquires();
        if contended_acquires > 0 {
            locks.push(LockFinding {
                lock_address,
                contended_acquires,
            });
        }
    });
    locks.sort_by(|a, b| b.contended_acquires.cmp(&a.contended_acquires));

    Report {
        header: ReportHeader {
            version: env!("CARGO_PKG_VERSION"),
            generated_at: chrono::Local::now().to_rfc3339(),
            config: ConfigEcho {
                page_detail_threshold: config.page_detail_threshold,
                cache_detail_threshold: config.cache_detail_threshold,
                top_objects: config.top_objects,
                top_cache_lines: config.top_cache_lines,
            },
        },
        objects: top_objects.into_sorted_desc(),
        pages,
        sites,
        locks,
        counters: profiler.stats().snapshot().export(),
    }
}

/// Render the line-oriented text form.
pub fn render_text(report: &Report, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "==== numalens report (v{}) ====", report.header.version)?;
    writeln!(out, "generated: {}", report.header.generated_at)?;
    writeln!(
        out,
        "thresholds: page {} / line {}",
        report.header.config.page_detail_threshold, report.header.config.cache_detail_threshold
    )?;

    writeln!(out, "\n-- objects ({}) --", report.objects.len())?;
    for object in &report.objects {
        writeln!(
            out,
            "object {:#x} size {} site {:#x} thread {} score {}",
            object.start_address, object.size, object.site_fingerprint, object.alloc_thread,
            object.score
        )?;
        writeln!(
            out,
            "  accesses: alloc-thread {} others {}  invalidations {}",
            object.accesses_by_alloc_thread,
            object.accesses_by_others,
            object.invalidations_attributed
        )?;
        for line in &object.top_lines {
            writeln!(
                out,
                "  line {:#x} owner {} (first {}) invalidations {}+{} score {}",
                line.line_base,
                line.owner_thread,
                line.first_access_thread,
                line.invalidations_first,
                line.invalidations_others,
                line.score
            )?;
        }
    }

    writeln!(out, "\n-- shared pages ({}) --", report.pages.len())?;
    for page in &report.pages {
        writeln!(
            out,
            "page {:#x} first-touch {} foreign {}  r {}/{} w {}/{} (local/remote)",
            page.page_base,
            page.first_touch_thread,
            page.foreign_accesses,
            page.reads_local,
            page.reads_remote,
            page.writes_local,
            page.writes_remote
        )?;
    }

    writeln!(out, "\n-- allocation sites ({}) --", report.sites.len())?;
    for site in &report.sites {
        writeln!(
            out,
            "site {:#x} objects {}/{} freed, {} bytes, accesses {}+{}, invalidations {}",
            site.fingerprint,
            site.objects_allocated,
            site.objects_freed,
            site.bytes_allocated,
            site.accesses_by_alloc_thread,
            site.accesses_by_others,
            site.invalidations
        )?;
    }

    writeln!(out, "\n-- contended locks ({}) --", report.locks.len())?;
    for lock in &report.locks {
        writeln!(
            out,
            "lock {:#x} contended acquires {}",
            lock.lock_address, lock.contended_acquires
        )?;
    }

    writeln!(out, "\n-- counters --")?;
    for (name, value) in &report.counters {
        writeln!(out, "{name}: {value}")?;
    }
    out.flush()
}

/// Writer over a raw file descriptor the profiler does not own (the
/// target's stderr, usually). Never closes the descriptor.
pub struct FdWriter {
    fd: i32,
}

impl FdWriter {
    pub fn new(fd: i32) -> Self {
        Self { fd }
    }
}

impl Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // SAFETY: plain write on a descriptor we treat as borrowed.
        let written = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if written < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(written as usize)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Build and emit the report in the configured rendition.
pub fn emit(profiler: &Profiler) -> Result<()> {
    let config = profiler.config();
    if config.verbose {
        log::info!("emitting report to fd {}", config.report_fd);
    }

    let report = build_report(profiler);
    let mut writer = FdWriter::new(config.report_fd);

    if config.json_report {
        serde_json::to_writer_pretty(&mut writer, &report)
            .map_err(|err| NlensError::Internal(format!("report serialization: {err}")))?;
        writer
            .write_all(b"\n")
            .map_err(|err| NlensError::Internal(format!("report write: {err}")))?;
    } else {
        render_text(&report, &mut writer)
            .map_err(|err| NlensError::Internal(format!("report write: {err}")))?;
    }
    Ok(())
}
