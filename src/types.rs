/// Wikipedia page title used as the DumpDB key.
/// Example: `Paris`
pub type PageTitle = String;
/// Canonical entity identifier (a resolved link target title).
/// Examples: `Paris_(city)`, `Paris,_Texas`
pub type EntityId = String;
/// Normalized surface string that may refer to an entity.
/// Examples: `paris`, `new york city`
pub type MentionText = String;
/// Dense word token identifier produced by a `Tokenizer`.
pub type TokenId = u32;
/// Dense entity identifier assigned by `EntityVocab`.
pub type EntityIndex = u32;
/// Monotonic training step counter.
pub type GlobalStep = u64;
/// One worker-sized group of page titles.
/// Chunk identity is the partition index, never completion order.
pub type PageChunk = Vec<PageTitle>;
