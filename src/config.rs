/// Number of SHA-256 digest bytes kept for a title hash (hex length is twice this)
pub const HASH_BYTES: usize = 8;

/// Hex characters of a title hash used as the store shard key; the rest is the field key.
/// Changing this invalidates every stored map.
pub const SHARD_PREFIX_LEN: usize = 4;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Buffer size for graph and title-log writers
pub const WRITER_BUFFER_SIZE: usize = 128 * 1024;

pub const CHECKPOINT_VERSION: u32 = 1;

pub const PAGE_COUNTER: &str = "counter:page";
pub const CATEGORY_COUNTER: &str = "counter:category";
pub const UNUSED_CATEGORY_IDS: &str = "unused:category";

pub const TITLE_LOG_FILE: &str = "titles.log";
pub const PAGE_GRAPH_FILE: &str = "pages.graph";
pub const CATEGORY_GRAPH_FILE: &str = "categories.graph";
pub const MEMBERSHIP_FILE: &str = "category_pages.bin";
pub const CATEGORY_MEMBERS_FILE: &str = "category_members.graph";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.bin";
pub const STORE_DIR: &str = "store.sled";

/// Namespaces whose links are dropped, compared lower-cased after `_` became space.
pub const IGNORED_NAMESPACES: &[&str] = &[
    "file",
    "image",
    "media",
    "s",
    "user",
    "user talk",
    "template",
    "wiktionary",
    "wikt",
    "wikipedia",
    "wikipedia talk",
    "wp",
    "help",
    "wikisource",
    "wikibooks",
    "portal",
    "commons",
    "talk",
];

/// Prefixes that mark an embedded media link whose caption may contain nested links.
pub const MEDIA_NAMESPACES: &[&str] = &["file", "image", "media"];

/// Interwiki language prefixes.
pub const LANGUAGE_CODES: &[&str] = &[
    "aa", "ab", "ace", "ady", "af", "ak", "als", "alt", "am", "an", "ang", "ar", "arc", "ary",
    "arz", "as", "ast", "atj", "av", "avk", "awa", "ay", "az", "azb", "ba", "ban", "bar",
    "bat-smg", "bcl", "be", "be-tarask", "be-x-old", "bg", "bh", "bi", "bjn", "blk", "bm", "bn",
    "bo", "bpy", "br", "bs", "bug", "bxr", "ca", "cbk-zam", "cdo", "ce", "ceb", "ch", "cho",
    "chr", "chy", "ckb", "co", "cr", "crh", "cs", "csb", "cu", "cv", "cy", "da", "dag", "de",
    "din", "diq", "dsb", "dty", "dv", "dz", "ee", "el", "eml", "en", "eo", "es", "et", "eu",
    "ext", "fa", "ff", "fi", "fiu-vro", "fj", "fo", "fr", "frp", "frr", "fur", "fy", "ga",
    "gag", "gan", "gcr", "gd", "gl", "glk", "gn", "gom", "gor", "got", "gu", "guw", "gv", "ha",
    "hak", "haw", "he", "hi", "hif", "ho", "hr", "hsb", "ht", "hu", "hy", "hyw", "hz", "ia",
    "id", "ie", "ig", "ii", "ik", "ilo", "inh", "io", "is", "it", "iu", "ja", "jam", "jbo",
    "jv", "ka", "kaa", "kab", "kbd", "kbp", "kg", "ki", "kj", "kk", "kl", "km", "kn", "ko",
    "koi", "kr", "krc", "ks", "ksh", "ku", "kv", "kw", "ky", "la", "lad", "lb", "lbe", "lez",
    "lfn", "lg", "li", "lij", "lld", "lmo", "ln", "lo", "lrc", "lt", "ltg", "lv", "mad", "mai",
    "map-bms", "mdf", "mg", "mh", "mhr", "mi", "min", "mk", "ml", "mn", "mni", "mnw", "mo",
    "mr", "mrj", "ms", "mt", "mus", "mwl", "my", "myv", "mzn", "na", "nah", "nap", "nds",
    "nds-nl", "ne", "new", "ng", "nia", "nl", "nn", "no", "nov", "nqo", "nrm", "nso", "nv",
    "ny", "oc", "olo", "om", "or", "os", "pa", "pag", "pam", "pap", "pcd", "pdc", "pfl", "pi",
    "pih", "pl", "pms", "pnb", "pnt", "ps", "pt", "qu", "rm", "rmy", "rn", "ro", "roa-rup",
    "roa-tara", "ru", "rue", "rw", "sa", "sah", "sat", "sc", "scn", "sco", "sd", "se", "sg",
    "sh", "shi", "shn", "si", "simple", "sk", "skr", "sl", "sm", "smn", "sn", "so", "sq", "sr",
    "srn", "ss", "st", "stq", "su", "sv", "sw", "szl", "szy", "ta", "tay", "tcy", "te", "tet",
    "tg", "th", "ti", "tk", "tl", "tn", "to", "tpi", "tr", "trv", "ts", "tt", "tum", "tw", "ty",
    "tyv", "udm", "ug", "uk", "ur", "uz", "ve", "vec", "vep", "vi", "vls", "vo", "wa", "war",
    "wo", "wuu", "xal", "xh", "xmf", "yi", "yo", "za", "zea", "zh", "zh-classical",
    "zh-min-nan", "zh-yue", "zu",
];

/// Worker threads for per-file stages; 0 lets rayon pick one per core.
pub const DEFAULT_THREADS: usize = 0;

/// Damping factor for PageRank
pub const PAGERANK_DAMPING: f64 = 0.85;

/// PageRank stops after this many iterations or once the L1 change drops below the tolerance
pub const PAGERANK_MAX_ITERATIONS: usize = 100;
pub const PAGERANK_TOLERANCE: f64 = 1e-9;

/// Ranked nodes reported by `analyze rank` unless `--top` says otherwise
pub const PAGERANK_RESULTS: usize = 100;
