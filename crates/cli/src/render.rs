use crate::commands::{Output, UploadReport};
use anyhow::Result;
use photo_api::Photo;
use uploader_core::gallery::GalleryPage;
use uploader_core::models::TaskStatus;

pub fn render(output: &Output, json: bool) -> Result<String> {
    if json {
        let value = match output {
            Output::Signed(user) => serde_json::to_value(user)?,
            Output::Message(msg) => serde_json::json!({ "status": "ok", "message": msg }),
            Output::Upload(report) => serde_json::to_value(report)?,
            Output::Gallery(page) => serde_json::to_value(page)?,
            Output::Tags(tags) => serde_json::to_value(tags)?,
            Output::Photo(photo) => serde_json::to_value(photo)?,
        };
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    Ok(match output {
        Output::Signed(user) => format!("signed in as {} <{}>", user.full_name, user.email),
        Output::Message(msg) => msg.clone(),
        Output::Upload(report) => upload_text(report),
        Output::Gallery(page) => gallery_text(page),
        Output::Tags(tags) if tags.is_empty() => "(no tags)".to_string(),
        Output::Tags(tags) => tags.join("\n"),
        Output::Photo(photo) => photo_line(photo),
    })
}

fn upload_text(report: &UploadReport) -> String {
    let mut lines: Vec<String> = report
        .tasks
        .iter()
        .map(|t| match (&t.status, &t.error) {
            (TaskStatus::Error, Some(err)) => {
                let hint = if t.transient { " (temporary, retry may succeed)" } else { "" };
                format!(
                    "[{}] {:>3}% {}: {}{}",
                    t.status.as_str(),
                    t.progress,
                    t.filename,
                    err,
                    hint
                )
            }
            _ => format!(
                "[{}] {:>3}% {} {}",
                t.status.as_str(),
                t.progress,
                t.filename,
                t.photo_id.as_deref().unwrap_or("")
            )
            .trim_end()
            .to_string(),
        })
        .collect();
    lines.extend(report.skipped.iter().map(|s| format!("skipped: {}", s)));
    lines.push(format!(
        "{} uploaded, {} failed, {} skipped",
        report.stats.complete,
        report.stats.error,
        report.skipped.len()
    ));
    lines.join("\n")
}

fn gallery_text(page: &GalleryPage) -> String {
    let mut header = format!(
        "page {}/{} ({} photo(s)",
        page.page + 1,
        page.total_pages.max(1),
        page.total_elements
    );
    if let Some(tag) = &page.tag {
        header.push_str(&format!(", tag: {}", tag));
    }
    header.push_str(&format!(", fetched {})", page.fetched_at.format("%H:%M:%S")));
    let processing = page.photos.iter().filter(|p| !p.status.is_terminal()).count();
    if processing > 0 {
        header.push_str(&format!("\n{} still processing", processing));
    }
    if page.photos.is_empty() {
        return format!("{}\nno photos", header);
    }
    let mut lines = vec![header];
    lines.extend(page.photos.iter().map(photo_line));
    lines.join("\n")
}

fn photo_line(photo: &Photo) -> String {
    format!(
        "{}  {:<10}  {}  [{}]",
        photo.id,
        photo.status.as_str(),
        photo.filename,
        photo.tags.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_api::PhotoStatus;
    use uploader_core::models::{UploadStats, UploadTask};

    fn task(name: &str, status: TaskStatus, progress: u8, error: Option<&str>) -> UploadTask {
        UploadTask {
            id: 1,
            filename: name.into(),
            content_type: "image/jpeg".into(),
            declared_size: Some(3),
            progress,
            status,
            error: error.map(str::to_string),
            transient: false,
            photo_id: None,
            upload_job_id: None,
        }
    }

    #[test]
    fn upload_summary_lists_failures_and_skips() {
        let tasks = vec![
            task("a.jpg", TaskStatus::Complete, 100, None),
            task("b.jpg", TaskStatus::Error, 30, Some("Storage upload failed: boom")),
        ];
        let report = UploadReport {
            stats: UploadStats::from_tasks(&tasks),
            tasks,
            skipped: vec!["notes.txt is not an image file (text/plain)".into()],
        };
        let text = render(&Output::Upload(report), false).unwrap();
        assert_eq!(
            text,
            "[complete] 100% a.jpg\n\
             [error]  30% b.jpg: Storage upload failed: boom\n\
             skipped: notes.txt is not an image file (text/plain)\n\
             1 uploaded, 1 failed, 1 skipped"
        );
    }

    #[test]
    fn transient_failures_get_a_retry_hint() {
        let mut flaky = task("c.jpg", TaskStatus::Error, 80, Some("File stored but completion notice failed: server error 503: busy"));
        flaky.transient = true;
        let report = UploadReport {
            stats: UploadStats::from_tasks([&flaky]),
            tasks: vec![flaky],
            skipped: vec![],
        };
        let text = render(&Output::Upload(report), false).unwrap();
        assert!(text.starts_with("[error]  80% c.jpg: File stored"));
        assert!(text.lines().next().unwrap().ends_with("(temporary, retry may succeed)"));
    }

    #[test]
    fn gallery_header_counts_unfinished_photos() {
        let photo = |id: &str, status: PhotoStatus| Photo {
            id: id.into(),
            filename: format!("{}.jpg", id),
            file_size: 1,
            user_id: "u1".into(),
            status,
            content_type: "image/jpeg".into(),
            tags: vec!["beach".into()],
            created_at: None,
            updated_at: None,
            thumbnail_url: None,
            download_url: None,
        };
        let page = GalleryPage {
            photos: vec![
                photo("p1", PhotoStatus::Complete),
                photo("p2", PhotoStatus::Processing),
                photo("p3", PhotoStatus::Failed),
            ],
            page: 0,
            size: 100,
            total_elements: 3,
            total_pages: 1,
            tag: Some("beach".into()),
            fetched_at: "2024-05-01T10:00:00Z".parse().unwrap(),
        };
        let text = render(&Output::Gallery(page), false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("page 1/1 (3 photo(s), tag: beach"));
        assert_eq!(lines[1], "1 still processing");
        assert_eq!(lines[3], "p2  PROCESSING  p2.jpg  [beach]");
    }

    #[test]
    fn json_message_is_an_object() {
        let out = render(&Output::Message("signed out".into()), true).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["message"], "signed out");
    }

    #[test]
    fn empty_tag_list_has_placeholder() {
        assert_eq!(render(&Output::Tags(vec![]), false).unwrap(), "(no tags)");
    }
}
