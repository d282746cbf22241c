use std::sync::Arc;

use tempfile::tempdir;
use wikicorpus::{
    Anchor, DumpDbWriter, EntityLinker, MentionDb, MentionDbOptions, Tokenizer, VocabTokenizer,
};

fn build_dump(dir: &std::path::Path) -> wikicorpus::DumpDb {
    let mut writer =
        DumpDbWriter::create(dir.join("dump.bin"), false).expect("failed creating dump store");
    let pages: &[(&str, &str, &[(&str, &str)])] = &[
        (
            "France",
            "Paris is the capital of France. Paris hosts the Louvre.",
            &[("Paris", "Paris_(city)"), ("France", "France")],
        ),
        (
            "Texas",
            "Paris is a city in Texas. Paris was settled in the 1840s.",
            &[("Paris", "Paris,_Texas"), ("Texas", "Texas")],
        ),
        (
            "Tourism",
            "Many visit Paris each year. Paris draws crowds. Paris rarely disappoints.",
            &[
                ("Paris", "Paris_(city)"),
                ("Paris", "Paris_(city)"),
                ("Paris", "Paris_(city)"),
                ("Paris", "Paris_(city)"),
            ],
        ),
    ];
    for (title, text, links) in pages {
        let anchors = links
            .iter()
            .map(|(text, target)| Anchor {
                text: (*text).to_string(),
                target: (*target).to_string(),
            })
            .collect();
        writer.append(title, text, anchors).expect("append failed");
    }
    writer.finish().expect("finish failed")
}

fn candidate_dump(db: &MentionDb) -> Vec<(String, Vec<(String, u32, f64, f64)>)> {
    db.iter()
        .map(|(mention, candidates)| {
            (
                mention.clone(),
                candidates
                    .iter()
                    .map(|c| (c.entity.clone(), c.link_count, c.prior_prob, c.link_prob))
                    .collect(),
            )
        })
        .collect()
}

#[test]
fn build_is_invariant_across_pool_and_chunk_sizes() {
    let temp = tempdir().expect("failed creating tempdir");
    let dump = build_dump(temp.path());

    let baseline = MentionDb::build(
        &dump,
        &MentionDbOptions {
            pool_size: 1,
            chunk_size: 1,
            ..MentionDbOptions::default()
        },
    )
    .expect("build failed");

    for (pool_size, chunk_size) in [(2, 1), (4, 2), (1, 30), (3, 2)] {
        let db = MentionDb::build(
            &dump,
            &MentionDbOptions {
                pool_size,
                chunk_size,
                ..MentionDbOptions::default()
            },
        )
        .expect("build failed");
        assert_eq!(
            candidate_dump(&db),
            candidate_dump(&baseline),
            "pool_size={pool_size} chunk_size={chunk_size} diverged"
        );
    }
}

#[test]
fn paris_statistics_match_hand_computation() {
    let temp = tempdir().expect("failed creating tempdir");
    let dump = build_dump(temp.path());
    let db = MentionDb::build(
        &dump,
        &MentionDbOptions {
            pool_size: 1,
            min_link_prob: 0.1,
            ..MentionDbOptions::default()
        },
    )
    .expect("build failed");

    // "Paris" appears 7 times as text, 6 of them linked: 5x Paris_(city), 1x Paris,_Texas.
    let candidates = db.candidates("Paris").expect("paris missing");
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].entity, "Paris_(city)");
    assert_eq!(candidates[0].link_count, 5);
    assert!((candidates[0].prior_prob - 5.0 / 7.0).abs() < 1e-9);
    assert!((candidates[0].link_prob - 6.0 / 7.0).abs() < 1e-9);
    assert_eq!(candidates[1].entity, "Paris,_Texas");
    assert!((candidates[1].prior_prob - 1.0 / 7.0).abs() < 1e-9);
}

#[test]
fn min_link_count_prunes_rare_candidates() {
    let temp = tempdir().expect("failed creating tempdir");
    let dump = build_dump(temp.path());
    let db = MentionDb::build(
        &dump,
        &MentionDbOptions {
            pool_size: 1,
            min_link_count: 2,
            ..MentionDbOptions::default()
        },
    )
    .expect("build failed");

    let candidates = db.candidates("Paris").expect("paris missing");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].entity, "Paris_(city)");
}

#[test]
fn punctuated_mentions_count_unlinked_occurrences() {
    let temp = tempdir().expect("failed creating tempdir");
    let mut writer = DumpDbWriter::create(temp.path().join("dump.bin"), false)
        .expect("failed creating dump store");
    writer
        .append(
            "Texas",
            "Paris, Texas is small. Many people know Paris, Texas well.",
            vec![Anchor {
                text: "Paris, Texas".to_string(),
                target: "Paris,_Texas".to_string(),
            }],
        )
        .expect("append failed");
    let dump = writer.finish().expect("finish failed");
    let db = MentionDb::build(
        &dump,
        &MentionDbOptions {
            pool_size: 1,
            ..MentionDbOptions::default()
        },
    )
    .expect("build failed");

    // one link out of two surface occurrences; the unlinked one must count
    let candidates = db.candidates("Paris, Texas").expect("mention missing");
    assert_eq!(candidates[0].total_count, 2);
    assert!((candidates[0].prior_prob - 0.5).abs() < 1e-9);
    assert!((candidates[0].link_prob - 0.5).abs() < 1e-9);
}

#[test]
fn save_load_then_link_round_trips() {
    let temp = tempdir().expect("failed creating tempdir");
    let dump = build_dump(temp.path());
    let db = MentionDb::build(
        &dump,
        &MentionDbOptions {
            pool_size: 2,
            ..MentionDbOptions::default()
        },
    )
    .expect("build failed");

    let db_path = temp.path().join("mentions.db");
    db.save(&db_path).expect("save failed");
    let loaded = MentionDb::load(&db_path).expect("load failed");
    assert_eq!(loaded.len(), db.len());
    assert_eq!(loaded.candidate_count(), db.candidate_count());

    let tokenizer = VocabTokenizer::new(["[UNK]", "paris", "is", "lovely", "in", "june"], true);
    let linker = EntityLinker::new(Arc::new(loaded), 0.1);
    let sentence = "Paris is lovely in June";
    let links = linker.link(sentence, &tokenizer.tokenize(sentence));
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].entity, "Paris_(city)");
    assert_eq!((links[0].start, links[0].end), (0, 1));
}
