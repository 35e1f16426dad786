// Plain-text rendering of scan results and upload checks.

use crate::core::duplicate::DuplicateCluster;
use crate::core::hash::display_id_for_path;
use crate::core::image::Library;
use crate::services::upload::UploadReport;
use chrono::{DateTime, Local};
use std::path::PathBuf;

pub const MIN_PAGE_SIZE: usize = 5;
pub const MAX_PAGE_SIZE: usize = 30;

/// Text block for one cluster, plus the images it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub text: String,
    pub images: Vec<PathBuf>,
    /// `(part, of)` when an oversized cluster was split across pages.
    pub part: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportPage {
    pub sections: Vec<ReportSection>,
}

impl ReportPage {
    pub fn image_count(&self) -> usize {
        self.sections.iter().map(|s| s.images.len()).sum()
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|section| match section.part {
                Some((part, of)) => format!("{}\n(part {}/{})", section.text, part, of),
                None => section.text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// One cluster as text: members by file name, then the computed pair scores.
pub fn render_cluster(library: &Library, cluster: &DuplicateCluster) -> ReportSection {
    let mut members = cluster.images.clone();
    members.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut lines = vec!["[duplicate group]".to_string()];
    for path in &members {
        lines.push(format!(
            "{} ({})",
            library.short_path(path),
            display_id_for_path(path)
        ));
    }

    let mut pair_lines = Vec::new();
    for (i, x) in members.iter().enumerate() {
        for y in &members[i + 1..] {
            if let Some(score) = cluster.score_between(x, y) {
                pair_lines.push(format!(
                    "{} <-> {} sim={:.2}",
                    display_id_for_path(x),
                    display_id_for_path(y),
                    score
                ));
            }
        }
    }
    if !pair_lines.is_empty() {
        lines.push("similarity:".to_string());
        lines.extend(pair_lines);
    }

    ReportSection {
        text: lines.join("\n"),
        images: members,
        part: None,
    }
}

pub fn render_clusters(library: &Library, clusters: &[DuplicateCluster]) -> Vec<ReportSection> {
    clusters
        .iter()
        .map(|cluster| render_cluster(library, cluster))
        .collect()
}

/// Pack sections into pages of at most `page_size` images.
///
/// Sections are never split unless a single one exceeds the page size; such
/// a section gets pages of its own, each repeating the text.
pub fn paginate_clusters(sections: Vec<ReportSection>, page_size: usize) -> Vec<ReportPage> {
    let page_size = page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    let mut pages = Vec::new();
    let mut current = ReportPage::default();

    for section in sections {
        if section.images.len() > page_size {
            if !current.sections.is_empty() {
                pages.push(std::mem::take(&mut current));
            }
            let chunks: Vec<&[PathBuf]> = section.images.chunks(page_size).collect();
            let of = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                pages.push(ReportPage {
                    sections: vec![ReportSection {
                        text: section.text.clone(),
                        images: chunk.to_vec(),
                        part: Some((i + 1, of)),
                    }],
                });
            }
            continue;
        }

        if !current.sections.is_empty() && current.image_count() + section.images.len() > page_size {
            pages.push(std::mem::take(&mut current));
        }
        current.sections.push(section);
    }

    if !current.sections.is_empty() {
        pages.push(current);
    }
    pages
}

pub fn render_header(generated_at: DateTime<Local>, clusters: &[DuplicateCluster]) -> String {
    let images: usize = clusters.iter().map(|c| c.len()).sum();
    format!(
        "Duplicate report {}: {} groups, {} images",
        generated_at.format("%Y-%m-%d %H:%M:%S"),
        clusters.len(),
        images
    )
}

/// Lines naming every rejected upload and the image it duplicates.
pub fn render_upload(library: &Library, report: &UploadReport, block_threshold: f32) -> String {
    let blocked = report.blocked(block_threshold);
    if blocked.is_empty() {
        return format!("All {} images accepted", report.verdicts.len());
    }

    let mut lines = vec![format!(
        "{} of {} images duplicate existing ones:",
        blocked.len(),
        report.verdicts.len()
    )];
    for b in blocked {
        lines.push(format!(
            "#{} {} duplicates {} ({}) sim={:.2}",
            b.position,
            library.short_path(&b.image),
            library.short_path(&b.existing),
            b.existing_id,
            b.score
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::duplicate::PairScore;
    use crate::core::image::Category;
    use crate::services::upload::{UploadMatch, UploadVerdict};
    use std::collections::BTreeMap;

    fn library() -> Library {
        let mut roots = BTreeMap::new();
        roots.insert(Category::Card, PathBuf::from("/data/card"));
        Library::new(PathBuf::from("/data"), roots, vec!["png".to_string()])
    }

    fn cluster(names: &[&str], scores: &[(usize, usize, f32)]) -> DuplicateCluster {
        let images: Vec<PathBuf> = names
            .iter()
            .map(|n| PathBuf::from(format!("/data/card/1102/{}", n)))
            .collect();
        let scores = scores
            .iter()
            .map(|&(a, b, score)| PairScore {
                a: images[a].clone(),
                b: images[b].clone(),
                score,
            })
            .collect();
        DuplicateCluster { images, scores }
    }

    fn section(images: usize) -> ReportSection {
        ReportSection {
            text: format!("{} images", images),
            images: (0..images).map(|i| PathBuf::from(format!("{}.png", i))).collect(),
            part: None,
        }
    }

    #[test]
    fn test_render_cluster() {
        let c = cluster(&["b.png", "a.png"], &[(0, 1, 0.934)]);
        let section = render_cluster(&library(), &c);

        let a_id = display_id_for_path(&PathBuf::from("a.png"));
        let b_id = display_id_for_path(&PathBuf::from("b.png"));
        let expected = format!(
            "[duplicate group]\ncard/1102/a.png ({a})\ncard/1102/b.png ({b})\nsimilarity:\n{a} <-> {b} sim=0.93",
            a = a_id,
            b = b_id
        );
        assert_eq!(section.text, expected);
        assert_eq!(section.images[0], PathBuf::from("/data/card/1102/a.png"));
    }

    #[test]
    fn test_render_cluster_without_scores() {
        let c = cluster(&["a.png", "b.png"], &[]);
        let section = render_cluster(&library(), &c);
        assert!(!section.text.contains("similarity:"));
    }

    #[test]
    fn test_pages_respect_size() {
        let pages = paginate_clusters(vec![section(3), section(2), section(4)], 5);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].image_count(), 5);
        assert_eq!(pages[1].image_count(), 4);
    }

    #[test]
    fn test_oversized_cluster_gets_own_pages() {
        let pages = paginate_clusters(vec![section(2), section(12), section(1)], 5);
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[0].image_count(), 2);
        assert_eq!(pages[1].sections[0].part, Some((1, 3)));
        assert_eq!(pages[3].sections[0].part, Some((3, 3)));
        assert_eq!(pages[3].image_count(), 2);
        assert_eq!(pages[4].image_count(), 1);
        assert!(pages[2].render().contains("(part 2/3)"));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let sections: Vec<ReportSection> = (0..40).map(|_| section(1)).collect();
        assert_eq!(paginate_clusters(sections.clone(), 1)[0].image_count(), 5);
        assert_eq!(paginate_clusters(sections, 100)[0].image_count(), 30);
        assert!(paginate_clusters(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_render_upload() {
        let existing = PathBuf::from("/data/card/1102/old.png");
        let report = UploadReport {
            verdicts: vec![
                UploadVerdict {
                    image: PathBuf::from("/data/card/1102/new1.png"),
                    matches: Vec::new(),
                },
                UploadVerdict {
                    image: PathBuf::from("/data/card/1102/new2.png"),
                    matches: vec![UploadMatch {
                        existing: existing.clone(),
                        score: 0.97,
                    }],
                },
            ],
        };

        let text = render_upload(&library(), &report, 0.9);
        assert!(text.starts_with("1 of 2 images"));
        let expected = format!(
            "#2 card/1102/new2.png duplicates card/1102/old.png ({}) sim=0.97",
            display_id_for_path(&existing)
        );
        assert!(text.contains(&expected));
        assert_eq!(render_upload(&library(), &report, 0.99), "All 2 images accepted");
    }
}
