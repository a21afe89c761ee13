#[cfg(test)]
mod tests {
    use crate::common::{
        at, connect, id, jurisdiction, queue_row, queued_case, setup, status, FIFTEEN_MINUTES,
    };
    use caseroute::error::{ClaimError, Error};
    use caseroute::store::CaseStatus;
    use caseroute::Clock;

    const ROUNDS: usize = 10;

    #[tokio::test]
    async fn exactly_one_temp_claim_wins() {
        let Some((mut client, router)) = setup(Clock::manual(at(2030, 2, 1, 9, 0))).await else {
            return;
        };
        let Some(mut first) = connect().await else {
            return;
        };
        let Some(mut second) = connect().await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;

        for _ in 0..ROUNDS {
            let patient = id();
            let (d1, d2) = (id(), id());
            let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

            let (r1, r2) = tokio::join!(
                router.temp_claim(&mut first, d1, case_id, FIFTEEN_MINUTES),
                router.temp_claim(&mut second, d2, case_id, FIFTEEN_MINUTES),
            );

            let winner = match (&r1, &r2) {
                (Ok(_), Err(err)) => {
                    assert!(
                        matches!(err, Error::Claim(ClaimError::CaseClaimForbidden { .. })),
                        "loser saw {err}"
                    );
                    d1
                }
                (Err(err), Ok(_)) => {
                    assert!(
                        matches!(err, Error::Claim(ClaimError::CaseClaimForbidden { .. })),
                        "loser saw {err}"
                    );
                    d2
                }
                _ => panic!("expected exactly one winner, got {r1:?} and {r2:?}"),
            };

            assert_eq!(
                status(&client, &router, case_id).await,
                CaseStatus::TempClaimed
            );

            let row = queue_row(&client, &router, case_id).await.unwrap();
            assert!(row.is_held_by(winner));
        }
    }

    #[tokio::test]
    async fn loser_can_claim_after_revoke() {
        let Some((mut client, router)) = setup(Clock::manual(at(2030, 2, 2, 9, 0))).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let (d1, d2) = (id(), id());
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, d1, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let err = router
            .temp_claim(&mut client, d2, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap_err();
        assert!(err.is_forbidden());

        router
            .revoke(&mut client, d1, patient, case_id)
            .await
            .unwrap();

        router
            .temp_claim(&mut client, d2, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let row = queue_row(&client, &router, case_id).await.unwrap();
        assert!(row.is_held_by(d2));
    }
}
