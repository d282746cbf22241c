//! Command-line interface over the full pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;

use crate::config::{
    CommonTrainingOpts, E2eOpts, MaskedLmOpts, RunArgs, RunOverrides, merge_json,
};
use crate::constants::{corpus as corpus_consts, mention_db as mention_consts, vocab as vocab_consts};
use crate::corpus::{CorpusBuildOptions, PageTarget, WikiCorpus, build_corpus_data};
use crate::dump::{DumpDb, build_from_jsonl};
use crate::errors::CorpusError;
use crate::linker::EntityLinker;
use crate::mention_db::{MentionDb, MentionDbOptions};
use crate::tokenize::{RuleSentenceTokenizer, VocabTokenizer};
use crate::trainer::{NullBackend, Trainer};
use crate::types::{EntityId, GlobalStep};
use crate::vocab::{EntityVocab, VocabBuildOptions};

/// Wikipedia corpus and pretraining pipeline.
#[derive(Parser)]
#[command(name = "wikicorpus", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a JSON-lines page dump into an indexed page store.
    BuildDumpDb {
        /// Input dump, one JSON page object per line.
        dump_file: PathBuf,
        /// Output page store file.
        out_file: PathBuf,
        /// Strip diacritics while cleaning page text.
        #[arg(long)]
        strip_accents: bool,
    },
    /// Build the mention statistics database from a page store.
    BuildMentionDb {
        /// Input page store.
        dump_db_file: PathBuf,
        /// Output mention database file.
        out_file: PathBuf,
        /// Minimum link probability for a mention to survive.
        #[arg(long, default_value_t = mention_consts::DEFAULT_MIN_LINK_PROB)]
        min_link_prob: f64,
        /// Cap on candidates kept per mention.
        #[arg(long, default_value_t = mention_consts::DEFAULT_MAX_CANDIDATE_SIZE)]
        max_candidate_size: usize,
        /// Minimum links for a candidate to survive.
        #[arg(long, default_value_t = mention_consts::DEFAULT_MIN_LINK_COUNT)]
        min_link_count: u32,
        /// Maximum mention length in characters.
        #[arg(long, default_value_t = mention_consts::DEFAULT_MAX_MENTION_LEN)]
        max_mention_len: usize,
        /// Match mention surfaces case-sensitively.
        #[arg(long)]
        cased: bool,
        /// Worker threads (defaults to the machine's parallelism).
        #[arg(long)]
        pool_size: Option<usize>,
        /// Pages per worker chunk.
        #[arg(long, default_value_t = mention_consts::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Build entity-annotated corpus shards from a page store.
    BuildWikiCorpus {
        /// Input page store.
        dump_db_file: PathBuf,
        /// Mention database built by `build-mention-db`.
        mention_db_file: PathBuf,
        /// Word vocabulary file, one surface per line.
        word_vocab_file: PathBuf,
        /// Output shard directory.
        out_dir: PathBuf,
        /// Page region to process.
        #[arg(long, value_enum, default_value_t = PageTarget::Full)]
        target: PageTarget,
        /// Tokenize case-sensitively.
        #[arg(long)]
        cased: bool,
        /// Minimum prior probability for an emitted entity link.
        #[arg(long, default_value_t = 0.1)]
        min_prior_prob: f64,
        /// Minimum sentence length in tokens.
        #[arg(long, default_value_t = corpus_consts::DEFAULT_MIN_SENTENCE_LEN)]
        min_sentence_len: usize,
        /// Worker threads (defaults to the machine's parallelism).
        #[arg(long)]
        pool_size: Option<usize>,
        /// Number of output shards.
        #[arg(long, default_value_t = 100)]
        num_page_chunks: usize,
    },
    /// Build the entity vocabulary from corpus link frequencies.
    BuildEntityVocab {
        /// Corpus shard directory.
        corpus_data_dir: PathBuf,
        /// Output vocabulary file.
        out_file: PathBuf,
        /// Maximum entities kept.
        #[arg(long, default_value_t = vocab_consts::DEFAULT_VOCAB_SIZE)]
        vocab_size: usize,
        /// File(s) of entities forced into the vocabulary, one per line.
        #[arg(short = 'w', long, action = ArgAction::Append)]
        white_list: Vec<PathBuf>,
        /// Keep only whitelisted entities.
        #[arg(long)]
        white_list_only: bool,
    },
    /// Start masked-LM pretraining from step zero.
    RunTraining {
        #[command(flatten)]
        io: RunIoArgs,
        #[command(flatten)]
        common: CommonTrainingOpts,
        #[command(flatten)]
        masked_lm: MaskedLmOpts,
    },
    /// Start end-to-end linking pretraining from step zero.
    RunE2eTraining {
        #[command(flatten)]
        io: RunIoArgs,
        #[command(flatten)]
        common: CommonTrainingOpts,
        #[command(flatten)]
        masked_lm: MaskedLmOpts,
        #[command(flatten)]
        e2e: E2eOpts,
    },
    /// Resume masked-LM pretraining from a checkpoint.
    ResumeTraining {
        #[command(flatten)]
        resume: ResumeArgs,
    },
    /// Resume end-to-end pretraining from a checkpoint.
    ResumeE2eTraining {
        #[command(flatten)]
        resume: ResumeArgs,
    },
}

/// Data locations and run-shape flags shared by the run subcommands.
#[derive(Args)]
struct RunIoArgs {
    /// Corpus shard directory.
    corpus_data_dir: PathBuf,
    /// Entity vocabulary file.
    entity_vocab_file: PathBuf,
    /// Base output directory; a timestamped run directory is created inside.
    output_dir: PathBuf,
    /// Run name; defaults to a timestamped one.
    #[arg(long)]
    run_name: Option<String>,
    /// Log directory; defaults to `<run dir>/log`.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Memory-map corpus shards instead of loading them.
    #[arg(long)]
    mmap: bool,
    /// Build examples from single sentences instead of sentence pairs.
    #[arg(long)]
    single_sentence: bool,
    /// Emit one token per mention instead of the full span.
    #[arg(long)]
    single_token_per_mention: bool,
    /// Keep optimizer state on the accelerator.
    #[arg(long)]
    allocate_gpu_for_optimizer: bool,
    /// Model weights to warm-start from.
    #[arg(long)]
    model_file: Option<String>,
    /// JSON object merged over the assembled arguments.
    #[arg(short = 'j', long)]
    json_data: Option<String>,
}

/// Checkpoint selection and overrides shared by the resume subcommands.
#[derive(Args)]
struct ResumeArgs {
    /// Run output directory holding the checkpoints.
    output_dir: PathBuf,
    /// Resume from this exact step instead of the latest checkpoint.
    #[arg(long)]
    global_step: Option<GlobalStep>,
    #[command(flatten)]
    overrides: RunOverrides,
    /// JSON object merged over the overrides.
    #[arg(short = 'j', long)]
    json_data: Option<String>,
}

impl Cli {
    /// Execute the selected subcommand.
    pub fn run(self) -> Result<(), CorpusError> {
        match self.command {
            Command::BuildDumpDb {
                dump_file,
                out_file,
                strip_accents,
            } => {
                let dump = build_from_jsonl(&dump_file, &out_file, strip_accents)?;
                info!(pages = dump.page_count(), out = %out_file.display(), "dump store built");
                Ok(())
            }
            Command::BuildMentionDb {
                dump_db_file,
                out_file,
                min_link_prob,
                max_candidate_size,
                min_link_count,
                max_mention_len,
                cased,
                pool_size,
                chunk_size,
            } => {
                let dump = DumpDb::open(&dump_db_file)?;
                let mut options = MentionDbOptions {
                    min_link_prob,
                    max_candidate_size,
                    min_link_count,
                    max_mention_len,
                    chunk_size,
                    uncased: !cased,
                    ..MentionDbOptions::default()
                };
                if let Some(pool_size) = pool_size {
                    options.pool_size = pool_size;
                }
                let db = MentionDb::build(&dump, &options)?;
                db.save(&out_file)?;
                info!(
                    mentions = db.len(),
                    candidates = db.candidate_count(),
                    out = %out_file.display(),
                    "mention database built"
                );
                Ok(())
            }
            Command::BuildWikiCorpus {
                dump_db_file,
                mention_db_file,
                word_vocab_file,
                out_dir,
                target,
                cased,
                min_prior_prob,
                min_sentence_len,
                pool_size,
                num_page_chunks,
            } => {
                let dump = DumpDb::open(&dump_db_file)?;
                let mention_db = Arc::new(MentionDb::load(&mention_db_file)?);
                let tokenizer = VocabTokenizer::from_file(&word_vocab_file, !cased)?;
                let linker = EntityLinker::new(mention_db, min_prior_prob);
                let mut options = CorpusBuildOptions {
                    target,
                    min_sentence_len,
                    num_page_chunks,
                    ..CorpusBuildOptions::default()
                };
                if let Some(pool_size) = pool_size {
                    options.pool_size = pool_size;
                }
                let stats = build_corpus_data(
                    &dump,
                    &tokenizer,
                    &RuleSentenceTokenizer,
                    &linker,
                    &out_dir,
                    &options,
                )?;
                info!(
                    shards = stats.shards,
                    records = stats.records,
                    out = %out_dir.display(),
                    "corpus built"
                );
                Ok(())
            }
            Command::BuildEntityVocab {
                corpus_data_dir,
                out_file,
                vocab_size,
                white_list,
                white_list_only,
            } => {
                let corpus = WikiCorpus::open(corpus_data_dir)?;
                let options = VocabBuildOptions {
                    vocab_size,
                    white_list: read_white_lists(&white_list)?,
                    white_list_only,
                };
                let vocab = EntityVocab::build(&corpus, &options)?;
                vocab.save(&out_file)?;
                info!(entities = vocab.len(), out = %out_file.display(), "entity vocab built");
                Ok(())
            }
            Command::RunTraining {
                io,
                common,
                masked_lm,
            } => start_run(io, common, masked_lm, None),
            Command::RunE2eTraining {
                io,
                common,
                masked_lm,
                e2e,
            } => start_run(io, common, masked_lm, Some(e2e)),
            Command::ResumeTraining { resume } | Command::ResumeE2eTraining { resume } => {
                resume_run(resume)
            }
        }
    }
}

fn read_white_lists(paths: &[PathBuf]) -> Result<Vec<EntityId>, CorpusError> {
    let mut entities = Vec::new();
    for path in paths {
        let content = fs::read_to_string(path)?;
        entities.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    Ok(entities)
}

fn start_run(
    io: RunIoArgs,
    common: CommonTrainingOpts,
    masked_lm: MaskedLmOpts,
    e2e: Option<E2eOpts>,
) -> Result<(), CorpusError> {
    let run_name = io
        .run_name
        .clone()
        .unwrap_or_else(|| Local::now().format("job_%Y%m%d-%H%M%S").to_string());
    let run_dir = io.output_dir.join(&run_name);
    let log_dir = io.log_dir.clone().unwrap_or_else(|| run_dir.join("log"));
    fs::create_dir_all(&run_dir)?;
    fs::create_dir_all(&log_dir)?;

    let mut args = RunArgs {
        corpus_data_dir: path_string(&io.corpus_data_dir),
        entity_vocab_file: path_string(&io.entity_vocab_file),
        output_dir: path_string(&run_dir),
        log_dir: path_string(&log_dir),
        mmap: io.mmap,
        single_sentence: io.single_sentence,
        single_token_per_mention: io.single_token_per_mention,
        allocate_gpu_for_optimizer: io.allocate_gpu_for_optimizer,
        model_file: io.model_file,
        optimizer_file: None,
        sparse_optimizer_file: None,
        global_step: 0,
        epoch: 0,
        common,
        masked_lm,
        e2e,
    };
    if let Some(json) = &io.json_data {
        merge_json(&mut args, json)?;
    }

    // entity vocab must load before any steps are spent
    let vocab = EntityVocab::load(Path::new(&args.entity_vocab_file))?;
    info!(run = %run_name, entities = vocab.len(), "starting training run");
    let mut trainer = Trainer::fresh(args, NullBackend::default())?;
    trainer.run()
}

fn resume_run(resume: ResumeArgs) -> Result<(), CorpusError> {
    let mut overrides = resume.overrides;
    if let Some(json) = &resume.json_data {
        merge_json(&mut overrides, json)?;
    }
    let output_dir = path_string(&resume.output_dir);
    let mut trainer = Trainer::resume(
        &output_dir,
        resume.global_step,
        &overrides,
        NullBackend::default(),
    )?;
    info!(step = trainer.global_step(), epoch = trainer.epoch(), "resuming training run");
    trainer.run()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
