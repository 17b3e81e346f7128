use std::path::Path;

use retrace_core::RetracePaths;

/// `retrace attempts`
pub fn execute(repo_root: &Path, json: bool) -> anyhow::Result<()> {
    let paths = RetracePaths::discover(repo_root);
    let reports = retrace_postmortem::list(&paths.root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!(
            "(no failed attempts recorded in {})",
            paths.failed_attempts_dir.display()
        );
        return Ok(());
    }
    for r in &reports {
        let created = if r.created.is_empty() {
            "-"
        } else {
            r.created.as_str()
        };
        println!("{created}  {}", r.file_name);
        if !r.query.is_empty() {
            println!("    query:   {}", r.query);
        }
        if !r.summary.is_empty() {
            println!("    summary: {}", truncate_str(&r.summary, 120));
        }
    }
    Ok(())
}

pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.replace('\n', " ")
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", s[..end].replace('\n', " "))
    }
}
