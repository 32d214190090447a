//! End-to-end tests for the card engine

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mockall::mock;
    use propcard::builder::{BuilderConfig, CardBuilder};
    use propcard::card::CandidateCard;
    use propcard::ev_provider::{
        EvOracle, EvProvider, EvQuote, LocalEvProvider, OracleBatch, OracleError, ProbabilityKey,
        QuoteSource, RemoteConfig, RemoteEvProvider,
    };
    use propcard::filters::{CorrelationConfig, CorrelationFilter, FilterDecision, FilterReason};
    use propcard::payout::{
        breakeven_probability, ev_from_distribution, hit_distribution, PayoutLadder, PayoutTable,
        StructureId, StructureKind,
    };
    use propcard::pipeline::{Optimizer, OptimizerConfig};
    use propcard::types::{Leg, Side, Site, Sport};
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    mock! {
        pub Oracle {}

        #[async_trait]
        impl EvOracle for Oracle {
            async fn price_batch(
                &self,
                keys: Vec<ProbabilityKey>,
            ) -> Result<OracleBatch, OracleError>;
        }
    }

    const TEAMS: [&str; 8] = ["LAL", "BOS", "MIA", "NYK", "DEN", "PHX", "DAL", "GSW"];

    fn make_leg(i: usize, site: Site, prob: f64) -> Leg {
        let team = TEAMS[i % TEAMS.len()];
        let opponent = TEAMS[(i + 1) % TEAMS.len()];
        let stat = if i % 3 == 2 { "threes" } else { "points" };
        Leg {
            id: format!("{}-{}-{}-20.5", site.code(), i, stat),
            // some players carry two stats
            player: format!("Player {}", i - i / 3),
            stat: stat.to_string(),
            line: 20.5,
            side: Side::Over,
            true_prob: prob,
            leg_ev: None,
            site,
            sport: Sport::NBA,
            team: Some(team.to_string()),
            opponent: Some(opponent.to_string()),
            game_id: None,
            start_time: None,
        }
    }

    fn slate() -> Vec<Leg> {
        let mut legs = Vec::new();
        for i in 0..24 {
            let prob = 0.56 + (i % 7) as f64 * 0.015;
            legs.push(make_leg(i, Site::PrizePicks, prob));
            legs.push(make_leg(i, Site::Underdog, prob - 0.01));
        }
        legs
    }

    fn local_provider(table: &Arc<PayoutTable>) -> Arc<EvProvider> {
        Arc::new(EvProvider::Local(LocalEvProvider::new(Arc::clone(table))))
    }

    fn seeded(seed: u64) -> BuilderConfig {
        BuilderConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn leg_sets(cards: &[CandidateCard]) -> BTreeSet<String> {
        cards
            .iter()
            .map(|c| format!("{}:{}", c.structure, c.leg_key()))
            .collect()
    }

    // ============================================================================
    // Payout math
    // ============================================================================

    #[test]
    fn five_flex_example_is_profitable() {
        let ladder = PayoutLadder::new(
            "TEST_5F",
            Site::PrizePicks,
            StructureKind::Flex,
            5,
            &[(5, 10.0), (4, 2.0), (3, 0.4)],
        )
        .unwrap();
        let dist = hit_distribution(&[0.6; 5]).unwrap();
        let quote = ev_from_distribution(&dist, &ladder, 1.0);

        assert!(quote.ev > 0.0);
        assert!(quote.win_prob_cash > 0.0 && quote.win_prob_cash < 1.0);
        assert!(quote.win_prob_any >= quote.win_prob_cash);
    }

    #[test]
    fn breakeven_round_trip_for_every_builtin_ladder() {
        let table = PayoutTable::builtin();
        for ladder in table.iter() {
            let p = breakeven_probability(ladder).unwrap();
            let dist = hit_distribution(&vec![p; ladder.picks]).unwrap();
            let quote = ev_from_distribution(&dist, ladder, 1.0);
            assert!(quote.ev.abs() < 1e-6, "{}: ev {} at p={}", ladder.id, quote.ev, p);
        }
    }

    // ============================================================================
    // Card Builder
    // ============================================================================

    #[tokio::test]
    async fn builder_cards_have_unique_players_and_exact_size() {
        let table = Arc::new(PayoutTable::builtin());
        let builder = CardBuilder::new(seeded(11), local_provider(&table));
        let ladders: Vec<PayoutLadder> = table.iter().cloned().collect();

        let out = builder.build_all(&slate(), &ladders).await;
        assert!(!out.candidates.is_empty());

        for card in &out.candidates {
            let ladder = table.get(&card.structure).unwrap();
            assert_eq!(card.size(), ladder.picks, "{}", card.structure);
            let players: HashSet<&str> = card.legs.iter().map(|l| l.player.as_str()).collect();
            assert_eq!(players.len(), card.size(), "duplicate player in {}", card.leg_key());
            assert!(card.legs.iter().all(|l| l.site == ladder.site));
            assert!(card.card_ev >= builder.config().min_ev.threshold(&card.structure, Sport::NBA));
        }

        let keys = leg_sets(&out.candidates);
        assert_eq!(keys.len(), out.candidates.len(), "duplicate leg sets survived dedupe");
        for pair in out.candidates.windows(2) {
            assert!(pair[0].card_ev >= pair[1].card_ev);
        }
    }

    #[tokio::test]
    async fn pruned_search_matches_exhaustive_search() {
        let table = Arc::new(PayoutTable::builtin());
        let ladders: Vec<PayoutLadder> = table.iter().cloned().collect();
        let legs = slate();

        let pruned = CardBuilder::new(seeded(42), local_provider(&table))
            .build_all(&legs, &ladders)
            .await;
        let exhaustive = CardBuilder::new(
            BuilderConfig {
                feasibility_pruning: false,
                ..seeded(42)
            },
            local_provider(&table),
        )
        .build_all(&legs, &ladders)
        .await;

        assert_eq!(leg_sets(&pruned.candidates), leg_sets(&exhaustive.candidates));
        let pruned_calls: usize = pruned.stats.iter().map(|s| s.ev_calls).sum();
        let exhaustive_calls: usize = exhaustive.stats.iter().map(|s| s.ev_calls).sum();
        assert!(pruned_calls <= exhaustive_calls);
    }

    #[tokio::test]
    async fn same_seed_reproduces_the_search() {
        let table = Arc::new(PayoutTable::builtin());
        let ladders: Vec<PayoutLadder> = table.iter().cloned().collect();
        let legs = slate();

        let a = CardBuilder::new(seeded(5), local_provider(&table))
            .build_all(&legs, &ladders)
            .await;
        let b = CardBuilder::new(seeded(5), local_provider(&table))
            .build_all(&legs, &ladders)
            .await;
        assert_eq!(leg_sets(&a.candidates), leg_sets(&b.candidates));
    }

    // ============================================================================
    // Correlation filter
    // ============================================================================

    #[test]
    fn opposite_sides_rejected_regardless_of_ev() {
        let table = Arc::new(PayoutTable::builtin());
        let ladder = table.get(&StructureId::new("2P")).unwrap();
        let mut over = make_leg(0, Site::PrizePicks, 0.95);
        over.leg_ev = Some(0.9);
        let mut under = over.clone();
        under.id = "PP-0-points-20.5-under".to_string();
        under.side = Side::Under;

        let card = CandidateCard::assemble(ladder, vec![over, under]).unwrap();
        let filter = CorrelationFilter::new(CorrelationConfig::default(), table);
        assert_eq!(
            filter.evaluate(&card).unwrap(),
            FilterDecision::Reject(FilterReason::SamePlayerConflict)
        );
    }

    // ============================================================================
    // Full run
    // ============================================================================

    #[tokio::test]
    async fn full_run_respects_portfolio_constraints() {
        let table = Arc::new(PayoutTable::builtin());
        let config = OptimizerConfig {
            builder: seeded(3),
            ..Default::default()
        };
        let optimizer = Optimizer::new(config.clone(), Arc::clone(&table), local_provider(&table));
        let report = optimizer.run(&slate()).await.unwrap();

        assert_eq!(report.provider, "local");
        assert!(!report.provider_degraded);
        assert_eq!(report.filter.input, report.built);
        assert_eq!(report.candidates.len(), report.filter.kept);

        let c = &config.portfolio;
        let mut players: HashMap<String, usize> = HashMap::new();
        let mut games: HashMap<String, usize> = HashMap::new();
        let mut teams: HashMap<String, usize> = HashMap::new();
        let mut fraction = 0.0;
        for card in &report.portfolio.selected {
            let kelly = card.kelly.as_ref().unwrap();
            assert!(kelly.final_fraction > 0.0);
            assert!(kelly.final_fraction <= config.kelly.max_per_card_fraction + 1e-12);
            assert!(card.card_ev >= c.min_card_ev);
            fraction += kelly.final_fraction;
            for p in card.players() {
                *players.entry(p.to_string()).or_insert(0) += 1;
            }
            for g in card.games() {
                *games.entry(g).or_insert(0) += 1;
            }
            for t in card.teams() {
                *teams.entry(t.to_string()).or_insert(0) += 1;
            }
        }
        assert!(fraction <= c.daily_risk_budget + 1e-12);
        assert!(players.values().all(|&n| n <= c.max_cards_per_player));
        assert!(games.values().all(|&n| n <= c.max_cards_per_game));
        assert!(teams.values().all(|&n| n <= c.max_cards_per_team));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(&report.run_id.to_string()));
    }

    // ============================================================================
    // Remote EV provider
    // ============================================================================

    #[tokio::test]
    async fn degraded_remote_answers_zero_without_calling_oracle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut oracle = MockOracle::new();
        oracle.expect_price_batch().returning(move |keys| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OracleError::RateLimited)
            } else {
                let mut batch = OracleBatch::new();
                for key in keys {
                    let mut quotes = HashMap::new();
                    quotes.insert(StructureId::new("5F"), EvQuote { ev: 0.12, roi: 0.12 });
                    batch.insert(key, quotes);
                }
                Ok(batch)
            }
        });

        let config = RemoteConfig {
            batch_size: 1,
            wait_timeout_ms: 200,
            max_consecutive_rate_limits: 1,
            ..Default::default()
        };
        let remote = RemoteEvProvider::new(Arc::new(oracle), config);
        let structure = StructureId::new("5F");
        let key = ProbabilityKey::from_probability(0.6);

        let first = remote.get_ev(&structure, key).await;
        assert_eq!(first.quote.ev, 0.0);
        assert!(remote.is_degraded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for p in [0.58, 0.61, 0.63] {
            let started = Instant::now();
            let priced = remote
                .get_ev(&structure, ProbabilityKey::from_probability(p))
                .await;
            assert!(started.elapsed() < Duration::from_millis(200));
            assert_eq!(priced.quote.ev, 0.0);
            assert_eq!(priced.source, QuoteSource::DegradedFallback);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // explicit flush probes the oracle and closes the circuit
        remote.flush().await;
        assert!(!remote.is_degraded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let priced = remote.get_ev(&structure, key).await;
        assert_eq!(priced.source, QuoteSource::CacheHit);
        assert!((priced.quote.ev - 0.12).abs() < 1e-12);
    }

    #[tokio::test]
    async fn degraded_provider_cancels_the_builder() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_price_batch()
            .returning(|_| Err(OracleError::RateLimited));
        let config = RemoteConfig {
            batch_size: 1,
            wait_timeout_ms: 100,
            max_consecutive_rate_limits: 2,
            ..Default::default()
        };
        let table = Arc::new(PayoutTable::builtin());
        let remote = RemoteEvProvider::new(Arc::new(oracle), config);
        let provider = Arc::new(EvProvider::Remote(remote));
        let optimizer = Optimizer::new(
            OptimizerConfig {
                site: Some(Site::PrizePicks),
                builder: seeded(9),
                ..Default::default()
            },
            table,
            Arc::clone(&provider),
        );

        let report = optimizer.run(&slate()).await.unwrap();
        assert!(report.provider_degraded);
        assert!(report.structures.iter().any(|s| s.aborted_degraded));
        assert!(report.candidates.is_empty());
        assert_eq!(report.portfolio.totals.selected_count, 0);
    }
}
