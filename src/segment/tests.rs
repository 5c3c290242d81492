use std::collections::BTreeMap;

use super::*;

fn segmenter() -> SectionSegmenter {
    SectionSegmenter::new(SegmentationSettings::default()).expect("segmenter builds")
}

fn filler(sentence: &str, times: usize) -> String {
    vec![sentence; times].join(" ")
}

#[test]
fn splits_text_on_accepted_headers() {
    let text = format!(
        "Title of the paper\n\nAbstract\nWe studied attention.\n\n1. Introduction\nPrior work exists.\n\n2. Method\n{}\n\nResults\nAccuracy was high.\n\nDiscussion\nIt worked.",
        filler("Stimuli were presented on a monitor at 60 Hz for 200 ms.", 5)
    );
    let sections = segmenter().segment(&text, &BTreeMap::new());

    assert_eq!(
        sections.kinds(),
        vec![
            SectionKind::Abstract,
            SectionKind::Introduction,
            SectionKind::Methods,
            SectionKind::Results,
            SectionKind::Discussion,
            SectionKind::Other,
        ]
    );
    let methods = sections.get(SectionKind::Methods).expect("methods present");
    assert_eq!(methods.source, SegmentSource::DetectedByHeader);
    assert!(methods.text.starts_with("2. Method"));
    assert!(!methods.text.contains("Accuracy"));
    assert_eq!(sections.text(SectionKind::Other), Some("Title of the paper"));
}

#[test]
fn prose_mentioning_section_words_is_not_a_header() {
    let text = format!(
        "Method\n{}\nThe results of the pilot study that we ran last year were informative for the design.\nMore method text follows here.",
        filler("Participants viewed stimuli on a monitor in a dark room.", 5)
    );
    let sections = segmenter().segment(&text, &BTreeMap::new());

    assert!(sections.get(SectionKind::Results).is_none());
    assert!(sections.text(SectionKind::Methods).unwrap_or_default().contains("pilot study"));
}

#[test]
fn subsections_are_absorbed_into_methods_until_major_header() {
    let text = format!(
        "Method\nOverview of the method.\n\nParticipants\nTwenty students took part.\n\nApparatus\n{}\n\nProcedure\nEach trial began with a fixation cross.\n\nResults\nPerformance was good.\n\nDesign\nThis line is in results.",
        filler("A CRT monitor was used at a viewing distance of 57 cm.", 4)
    );
    let sections = segmenter().segment(&text, &BTreeMap::new());

    let methods = sections.text(SectionKind::Methods).expect("methods present");
    assert!(methods.contains("Overview of the method."));
    assert!(methods.contains("Apparatus"));
    assert!(methods.contains("fixation cross"));
    assert!(!methods.contains("Performance"));

    let participants = sections.text(SectionKind::Participants).expect("participants present");
    assert!(participants.contains("Twenty students"));
    assert!(!participants.contains("Apparatus"));

    let results = sections.text(SectionKind::Results).expect("results present");
    assert!(results.contains("This line is in results."));
}

#[test]
fn repeated_methods_headers_concatenate() {
    let text = "Method\nFirst block of methods text.\n\nResults\nSome results.\n\nMethod\nSecond block of methods text.\n\nResults\nMore results.";
    let sections = segmenter().segment(text, &BTreeMap::new());

    let methods = sections.text(SectionKind::Methods).expect("methods present");
    assert!(methods.contains("First block"));
    assert!(methods.contains("Second block"));
    let results = sections.text(SectionKind::Results).expect("results present");
    assert!(results.contains("Some results."));
    assert!(!results.contains("More results."));
}

#[test]
fn keyword_density_recovers_methods_without_headers() {
    let text = "We were interested in memory and how it changes.\n\nTwenty participants were recruited and gave informed consent. Stimuli were presented on a monitor.\n\nPerformance improved over time, which we discuss.";
    let sections = segmenter().segment(text, &BTreeMap::new());

    let methods = sections.get(SectionKind::Methods).expect("methods recovered");
    assert_eq!(methods.source, SegmentSource::KeywordFallback);
    assert!(methods.text.starts_with("Twenty participants"));
    assert!(!methods.text.contains("interested in memory"));
}

#[test]
fn line_state_machine_switches_on_whole_line_headers() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let text = "Introduction\nWhy we did this.\nMethods:\nWe did this.\nWe did that too.\nParticipants\nSome people.\nResults\nIt worked.";
    let buffers = fallback::line_state_sections(text, &patterns);

    assert_eq!(buffers.introduction, "Why we did this.");
    assert_eq!(buffers.methods, "We did this.\nWe did that too.");
    assert_eq!(buffers.participants, "Some people.");
    assert_eq!(buffers.results, "It worked.");
}

#[test]
fn keyword_scanner_scores_paragraphs() {
    let scanner = KeywordScanner::new().expect("scanner compiles");
    assert_eq!(scanner.paragraph_score("Each trial lasted 500 ms."), 2);
    assert_eq!(scanner.paragraph_score("Nothing relevant here."), 0);
    assert_eq!(scanner.methods_paragraphs("Nothing relevant here."), None);

    let cases = [
        ("Prior theories made claims about participants in general.", false),
        ("The apparatus was described before.", false),
        ("The apparatus was used in each experiment.", true),
        ("Stimuli appeared once per trial.", true),
    ];
    for (paragraph, kept) in cases {
        assert_eq!(
            scanner.methods_paragraphs(paragraph).is_some(),
            kept,
            "paragraph {paragraph:?}"
        );
    }
}

#[test]
fn whole_document_becomes_methods_when_nothing_is_detected() {
    let text = "A short note without any structure at all.";
    let sections = segmenter().segment(text, &BTreeMap::new());

    let methods = sections.get(SectionKind::Methods).expect("methods fallback");
    assert_eq!(methods.source, SegmentSource::WholeDocument);
    assert_eq!(methods.text, text);
}

#[test]
fn supplied_sections_take_precedence_when_they_cover_two_kinds() {
    let supplied = BTreeMap::from([
        ("methods".to_string(), "Supplied methods text.".to_string()),
        ("results".to_string(), "Supplied results.".to_string()),
    ]);
    let sections = segmenter().segment("Method\nHeader-detected text.", &supplied);

    assert_eq!(sections.text(SectionKind::Methods), Some("Supplied methods text."));
    assert_eq!(
        sections.get(SectionKind::Methods).map(|segment| segment.source),
        Some(SegmentSource::Supplied)
    );
}

#[test]
fn single_supplied_section_is_ignored() {
    let supplied = BTreeMap::from([("methods".to_string(), "Only one.".to_string())]);
    let text = format!("Method\n{}", filler("Stimuli were presented for 200 ms on each trial.", 6));
    let sections = segmenter().segment(&text, &supplied);

    assert_eq!(
        sections.get(SectionKind::Methods).map(|segment| segment.source),
        Some(SegmentSource::DetectedByHeader)
    );
}

#[test]
fn header_must_start_near_line_start_and_be_short() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let settings = SegmentationSettings::default();

    let hits = patterns.find_headers("II. Methods\nIn the methods below\nThe Results", &settings);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, HeaderKind::Section(SectionKind::Methods));
    assert_eq!(hits[0].line_start, 0);
}

#[test]
fn materials_and_methods_is_a_major_header() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let hits = patterns.find_headers("Materials and Methods\n", &SegmentationSettings::default());
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, HeaderKind::Section(SectionKind::Methods));
}
