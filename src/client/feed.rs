use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    db::{MatchConnection, MatchDuration, MatchRequestWithUser, MatchType},
    ws::Event,
};

/// What the user typed or toggled above the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedFilter {
    pub search: String,
    /// Substring of the game name.
    pub game: String,
    pub mode: Option<String>,
    pub region: Option<String>,
    /// Show only hidden matches instead of hiding them.
    pub show_hidden: bool,
    pub long_term: bool,
}

impl FeedFilter {
    pub fn duration(&self) -> MatchDuration {
        if self.long_term { MatchDuration::LongTerm } else { MatchDuration::ShortTerm }
    }
}

/// Who is looking and what they already did.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: Option<Uuid>,
    pub hidden: HashSet<Uuid>,
    /// Match requests the viewer has a connection on.
    pub applied: HashSet<Uuid>,
}

impl Viewer {
    pub fn new<'a>(
        user_id: Option<Uuid>,
        hidden: impl IntoIterator<Item = Uuid>,
        connections: impl IntoIterator<Item = &'a MatchConnection>,
    ) -> Self {
        Self {
            user_id,
            hidden: hidden.into_iter().collect(),
            applied: connections.into_iter().map(|connection| connection.request_id).collect(),
        }
    }

    fn is_author(&self, request: &MatchRequestWithUser) -> bool {
        self.user_id == Some(request.request.user_id)
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A blank choice means "any".
fn selected(choice: &Option<String>) -> Option<&str> {
    choice.as_deref().map(str::trim).filter(|choice| !choice.is_empty())
}

pub fn is_visible(request: &MatchRequestWithUser, filter: &FeedFilter, viewer: &Viewer) -> bool {
    let Some(gamertag) = &request.gamertag else {
        return false;
    };
    let id = request.request.id;

    if viewer.applied.contains(&id) && !viewer.is_author(request) {
        return false;
    }
    if viewer.hidden.contains(&id) != filter.show_hidden {
        return false;
    }

    let search = filter.search.trim();
    if !search.is_empty()
        && !contains_ci(&request.request.game_name, search)
        && !contains_ci(&request.request.description, search)
        && !contains_ci(gamertag, search)
    {
        return false;
    }

    let game = filter.game.trim();
    if !game.is_empty() && !contains_ci(&request.request.game_name, game) {
        return false;
    }
    if let Some(mode) = selected(&filter.mode) {
        if mode != request.request.game_mode {
            return false;
        }
    }
    if let Some(region) = selected(&filter.region) {
        if request.request.region.as_deref() != Some(region) {
            return false;
        }
    }
    true
}

#[derive(Debug, Default, PartialEq)]
pub struct Section<'a> {
    pub yours: Vec<&'a MatchRequestWithUser>,
    pub others: Vec<&'a MatchRequestWithUser>,
}

impl Section<'_> {
    pub fn is_empty(&self) -> bool {
        self.yours.is_empty() && self.others.is_empty()
    }
}

/// The visible requests of the selected duration, as LFG and LFO sections.
#[derive(Debug, Default, PartialEq)]
pub struct Feed<'a> {
    pub lfg: Section<'a>,
    pub lfo: Section<'a>,
}

pub fn build<'a>(requests: &'a [MatchRequestWithUser], filter: &FeedFilter, viewer: &Viewer) -> Feed<'a> {
    let duration = filter.duration();
    let mut feed = Feed::default();

    for request in requests {
        if request.request.duration != duration || !is_visible(request, filter, viewer) {
            continue;
        }
        let section = match request.request.match_type {
            MatchType::Lfg => &mut feed.lfg,
            MatchType::Lfo => &mut feed.lfo,
        };
        if viewer.is_author(request) {
            section.yours.push(request);
        } else {
            section.others.push(request);
        }
    }
    feed
}

/// The last fetched page, kept current by pushed events.
#[derive(Debug, Clone, Default)]
pub struct FeedCache {
    pub requests: Vec<MatchRequestWithUser>,
    /// New requests arrived; the page must be fetched again.
    pub stale: bool,
}

impl FeedCache {
    pub fn new(requests: Vec<MatchRequestWithUser>) -> Self {
        Self { requests, stale: false }
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::MatchRequestCreated { .. } => self.stale = true,
            Event::MatchRequestUpdated { data, .. } => {
                if let Some(cached) = self.requests.iter_mut().find(|cached| cached.request.id == data.id) {
                    cached.request = data.clone();
                }
            }
            Event::MatchRequestDeleted { data, .. } => {
                self.requests.retain(|cached| cached.request.id != data.id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::{
        db::{ConnectionStatus, MatchRequest, MatchStatus},
        ws::event::Deleted,
    };

    fn request(author: Uuid, game: &str, match_type: MatchType, duration: MatchDuration) -> MatchRequestWithUser {
        let now = OffsetDateTime::now_utc();
        MatchRequestWithUser {
            request: MatchRequest {
                id: Uuid::now_v7(),
                user_id: author,
                game_name: game.to_owned(),
                game_mode: "Ranked".to_owned(),
                match_type,
                duration,
                tournament_name: None,
                description: "need a support main".to_owned(),
                status: MatchStatus::Waiting,
                region: Some("EU".to_owned()),
                created_at: now,
                updated_at: now,
            },
            gamertag: Some(format!("{game}-fan")),
            profile_image_url: None,
            latitude: None,
            longitude: None,
        }
    }

    fn short(author: Uuid, game: &str) -> MatchRequestWithUser {
        request(author, game, MatchType::Lfg, MatchDuration::ShortTerm)
    }

    #[test]
    fn orphaned_requests_are_dropped() {
        let mut orphan = short(Uuid::now_v7(), "Valorant");
        orphan.gamertag = None;
        assert!(!is_visible(&orphan, &FeedFilter::default(), &Viewer::default()));
    }

    #[test]
    fn show_hidden_flips_the_view() {
        let me = Uuid::now_v7();
        let hidden = short(Uuid::now_v7(), "Valorant");
        let shown = short(Uuid::now_v7(), "Apex");
        let viewer = Viewer::new(Some(me), [hidden.request.id], []);

        let default = FeedFilter::default();
        assert!(!is_visible(&hidden, &default, &viewer));
        assert!(is_visible(&shown, &default, &viewer));

        let only_hidden = FeedFilter { show_hidden: true, ..Default::default() };
        assert!(is_visible(&hidden, &only_hidden, &viewer));
        assert!(!is_visible(&shown, &only_hidden, &viewer));
    }

    #[test]
    fn applied_requests_leave_the_feed_unless_authored() {
        let me = Uuid::now_v7();
        let theirs = short(Uuid::now_v7(), "Valorant");
        let mine = short(me, "Valorant");
        let now = OffsetDateTime::now_utc();
        let connections: Vec<MatchConnection> = [&theirs, &mine]
            .iter()
            .map(|request| MatchConnection {
                id: Uuid::now_v7(),
                request_id: request.request.id,
                requester_id: me,
                accepter_id: request.request.user_id,
                status: ConnectionStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();
        let viewer = Viewer::new(Some(me), [], &connections);

        assert!(!is_visible(&theirs, &FeedFilter::default(), &viewer));
        assert!(is_visible(&mine, &FeedFilter::default(), &viewer));
    }

    #[test]
    fn text_filters() {
        let request = short(Uuid::now_v7(), "Valorant");
        let viewer = Viewer::default();
        let check = |filter: FeedFilter| is_visible(&request, &filter, &viewer);

        assert!(check(FeedFilter { search: "SUPPORT".to_owned(), ..Default::default() }));
        assert!(check(FeedFilter { search: "valorant-FAN".to_owned(), ..Default::default() }));
        assert!(!check(FeedFilter { search: "tank".to_owned(), ..Default::default() }));
        assert!(check(FeedFilter { game: "valo".to_owned(), ..Default::default() }));
        assert!(!check(FeedFilter { game: "apex".to_owned(), ..Default::default() }));
        assert!(check(FeedFilter { mode: Some("Ranked".to_owned()), ..Default::default() }));
        // mode and region match exactly
        assert!(!check(FeedFilter { mode: Some("ranked".to_owned()), ..Default::default() }));
        assert!(!check(FeedFilter { region: Some("NA".to_owned()), ..Default::default() }));
        assert!(check(FeedFilter { region: Some("EU".to_owned()), ..Default::default() }));
    }

    #[test]
    fn blank_mode_and_region_match_everything() {
        let request = short(Uuid::now_v7(), "Valorant");
        let mut no_region = short(Uuid::now_v7(), "Apex");
        no_region.request.region = None;
        let viewer = Viewer::default();

        for blank in ["", "  "] {
            let filter = FeedFilter {
                mode: Some(blank.to_owned()),
                region: Some(blank.to_owned()),
                ..Default::default()
            };
            assert!(is_visible(&request, &filter, &viewer));
            assert!(is_visible(&no_region, &filter, &viewer));
        }
    }

    #[test]
    fn sections_split_by_type_duration_and_author() {
        let me = Uuid::now_v7();
        let other = Uuid::now_v7();
        let requests = vec![
            short(me, "Valorant"),
            short(other, "Valorant"),
            request(other, "Apex", MatchType::Lfo, MatchDuration::ShortTerm),
            request(other, "Dota", MatchType::Lfg, MatchDuration::LongTerm),
        ];
        let viewer = Viewer::new(Some(me), [], []);

        let feed = build(&requests, &FeedFilter::default(), &viewer);
        assert_eq!(feed.lfg.yours, vec![&requests[0]]);
        assert_eq!(feed.lfg.others, vec![&requests[1]]);
        assert_eq!(feed.lfo.others, vec![&requests[2]]);
        assert!(feed.lfo.yours.is_empty());

        let long = build(&requests, &FeedFilter { long_term: true, ..Default::default() }, &viewer);
        assert_eq!(long.lfg.others, vec![&requests[3]]);
        assert!(long.lfo.is_empty());
    }

    #[test]
    fn cache_follows_pushed_events() {
        let author = Uuid::now_v7();
        let first = short(author, "Valorant");
        let second = short(author, "Apex");
        let mut cache = FeedCache::new(vec![first.clone(), second.clone()]);

        let mut updated = first.request.clone();
        updated.status = MatchStatus::Connected;
        cache.apply(&Event::MatchRequestUpdated { data: updated, message: String::new() });
        assert_eq!(cache.requests[0].request.status, MatchStatus::Connected);
        assert_eq!(cache.requests[0].gamertag, first.gamertag);

        cache.apply(&Event::MatchRequestDeleted { data: Deleted { id: second.request.id }, message: String::new() });
        assert_eq!(cache.requests.len(), 1);
        // a deleted request stays out of the built feed
        let feed = build(&cache.requests, &FeedFilter::default(), &Viewer::default());
        assert!(feed.lfg.others.iter().all(|request| request.request.id != second.request.id));

        assert!(!cache.stale);
        cache.apply(&Event::MatchRequestCreated { data: second.request.clone(), message: String::new() });
        assert!(cache.stale);

        cache.apply(&Event::Pong);
        assert_eq!(cache.requests.len(), 1);
    }
}
