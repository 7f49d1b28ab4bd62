//! Category taxonomy for thematic digests.
//!
//! The list order is significant: the classifier walks categories in this
//! order and the first category an email qualifies for claims it. Any change
//! to names, keywords, sender domains or order must bump `TAXONOMY_VERSION`,
//! because stored digests record the version that produced them.

/// Version of the category list below.
pub const TAXONOMY_VERSION: &str = "v2";

/// Label stored on every thematic digest produced with this taxonomy.
pub const PROCESSING_METHOD: &str = "keyword-fit-v2";

/// Catch-all theme for emails no category claims.
pub const OTHER_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub name: &'static str,
    /// Lowercase keywords, matched as substrings.
    pub keywords: &'static [&'static str],
    /// Sender domains that earn the category's sender bonus. A domain also
    /// matches its subdomains.
    pub sender_domains: &'static [&'static str],
}

pub const TAXONOMY: &[Category] = &[
    Category {
        name: "Politics",
        keywords: &[
            "election",
            "congress",
            "senate",
            "president",
            "campaign",
            "vote",
            "policy",
            "legislation",
            "democrat",
            "republican",
            "white house",
            "governor",
            "supreme court",
            "ballot",
            "poll",
        ],
        sender_domains: &[
            "politico.com",
            "thehill.com",
            "rollcall.com",
            "punchbowl.news",
            "thedispatch.com",
        ],
    },
    Category {
        name: "Business + Finance",
        keywords: &[
            "funding",
            "startup",
            "investor",
            "venture",
            "market",
            "stock",
            "earnings",
            "revenue",
            "ipo",
            "acquisition",
            "merger",
            "valuation",
            "economy",
            "inflation",
            "interest rate",
            "bank",
        ],
        sender_domains: &[
            "bloomberg.com",
            "wsj.com",
            "ft.com",
            "morningbrew.com",
            "cnbc.com",
        ],
    },
    Category {
        name: "Technology",
        keywords: &[
            "ai",
            "artificial intelligence",
            "machine learning",
            "software",
            "chip",
            "semiconductor",
            "cloud",
            "cybersecurity",
            "model",
            "robot",
            "data center",
            "silicon valley",
            "open source",
        ],
        sender_domains: &[
            "techcrunch.com",
            "theverge.com",
            "wired.com",
            "arstechnica.com",
            "stratechery.com",
            "tldrnewsletter.com",
        ],
    },
    Category {
        name: "Science + Health",
        keywords: &[
            "research",
            "study",
            "climate",
            "vaccine",
            "health",
            "medical",
            "disease",
            "scientist",
            "nasa",
            "space",
            "hospital",
            "drug",
            "fda",
        ],
        sender_domains: &[
            "statnews.com",
            "nature.com",
            "scientificamerican.com",
            "science.org",
        ],
    },
    Category {
        name: "World News",
        keywords: &[
            "ukraine",
            "russia",
            "china",
            "israel",
            "gaza",
            "united nations",
            "ceasefire",
            "diplomat",
            "sanctions",
            "refugee",
            "europe",
            "summit",
        ],
        sender_domains: &["reuters.com", "apnews.com", "bbc.co.uk", "aljazeera.net"],
    },
    Category {
        name: "Media",
        keywords: &[
            "journalism",
            "journalist",
            "newsroom",
            "podcast",
            "broadcast",
            "reporter",
            "editor",
            "media",
            "press freedom",
            "streaming",
        ],
        sender_domains: &["niemanlab.org", "cjr.org", "semafor.com", "poynter.org"],
    },
    Category {
        name: "Culture + Entertainment",
        keywords: &[
            "film",
            "movie",
            "music",
            "album",
            "book",
            "artist",
            "festival",
            "celebrity",
            "television",
            "theater",
            "museum",
        ],
        sender_domains: &[
            "variety.com",
            "hollywoodreporter.com",
            "pitchfork.com",
            "vulture.com",
        ],
    },
    Category {
        name: "Sports",
        keywords: &[
            "nfl",
            "nba",
            "soccer",
            "football",
            "championship",
            "playoff",
            "tournament",
            "olympic",
            "coach",
            "league",
        ],
        sender_domains: &["espn.com", "theathletic.com", "si.com"],
    },
    Category {
        name: OTHER_CATEGORY,
        keywords: &[],
        sender_domains: &[],
    },
];
