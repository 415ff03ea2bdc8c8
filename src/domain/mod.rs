pub mod article;
pub mod hot;
pub mod lexicon;

pub use article::{
    AllocationChange, AllocationGuard, AllocationStatus, Article, ArticleFilter, ArticleStatus,
    NewArticle, PoolVariant, ReleaseOutcome,
};
pub use hot::{
    ChannelKind, FetchedHotItem, HotPushConfig, HotPushHistory, HotRawItem, KeywordFilter,
    NewPushConfig, PushStatus, RecencyWindow,
};
pub use lexicon::{LexiconCategory, LexiconEntry, MatchHit, MatchResult};
