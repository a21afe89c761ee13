///
/// Sweeps scan every expired claim in the shared database.
/// Each test claims at its own instant far in the past and only checks its own case,
/// so a sweep started by another test revoking the claim first does not change the outcome.
///
#[cfg(test)]
mod tests {
    use crate::common::{
        active_file_edge, at, case_edge, file_edge, id, jurisdiction, minutes, queue_row,
        queued_case, setup, status, FIFTEEN_MINUTES,
    };
    use caseroute::config::SweeperConfig;
    use caseroute::error::{ClaimError, Error};
    use caseroute::store::{AssignmentStatus, CaseStatus};
    use caseroute::{Clock, Sweeper};
    use chrono::TimeDelta;

    #[tokio::test]
    async fn sweep_revokes_expired_claim() {
        let t = at(2001, 1, 1, 0, 0);
        let clock = Clock::manual(t);
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        clock.set(t + TimeDelta::minutes(16));

        let sweeper = Sweeper::new(SweeperConfig::default(), router.clone());
        let report = sweeper.sweep_once(&mut client).await.unwrap();
        assert_eq!(report.failed, 0);

        let row = queue_row(&client, &router, case_id).await.unwrap();
        assert!(!row.locked);
        assert_eq!(row.holder_id, None);
        assert_eq!(row.expires_at, None);

        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::Unclaimed
        );
        assert!(file_edge(&client, &router, doctor, patient).await.is_none());
        assert!(case_edge(&client, &router, doctor, case_id).await.is_none());

        // At least once: a second pass finds nothing of ours to do
        sweeper.sweep_once(&mut client).await.unwrap();
        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::Unclaimed
        );
    }

    #[tokio::test]
    async fn sweep_leaves_existing_active_file_edge() {
        let t = at(2002, 1, 1, 0, 0);
        let clock = Clock::manual(t);
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();

        active_file_edge(&mut client, &router, doctor, patient).await;
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        clock.set(t + TimeDelta::minutes(16));
        Sweeper::new(SweeperConfig::default(), router.clone())
            .sweep_once(&mut client)
            .await
            .unwrap();

        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::Unclaimed
        );
        assert!(case_edge(&client, &router, doctor, case_id).await.is_none());

        let file = file_edge(&client, &router, doctor, patient).await.unwrap();
        assert_eq!(file.status, AssignmentStatus::Active);
        assert_eq!(file.expires_at, None);
    }

    #[tokio::test]
    async fn sweep_skips_extended_claim() {
        let t = at(2003, 1, 1, 0, 0);
        let clock = Clock::manual(t);
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        clock.set(t + TimeDelta::minutes(10));
        router
            .extend(&mut client, doctor, patient, case_id, minutes(30))
            .await
            .unwrap();

        clock.set(t + TimeDelta::minutes(16));
        Sweeper::new(SweeperConfig::default(), router.clone())
            .sweep_once(&mut client)
            .await
            .unwrap();

        let row = queue_row(&client, &router, case_id).await.unwrap();
        assert!(row.is_held_by(doctor));
        assert_eq!(row.expires_at, Some(t + TimeDelta::minutes(40)));
        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::TempClaimed
        );
    }

    #[tokio::test]
    async fn revoke_expired_ignores_live_claim() {
        let t = at(2030, 4, 1, 9, 0);
        let Some((mut client, router)) = setup(Clock::manual(t)).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let revocation = router
            .revoke_expired(&mut client, doctor, patient, case_id)
            .await
            .unwrap();

        assert!(revocation.is_noop());
        assert!(case_edge(&client, &router, doctor, case_id)
            .await
            .unwrap()
            .is_temp());
        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::TempClaimed
        );
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let Some((mut client, router)) = setup(Clock::manual(at(2030, 4, 2, 9, 0))).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();
        let case_id = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, case_id, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let first = router
            .revoke(&mut client, doctor, patient, case_id)
            .await
            .unwrap();
        assert!(first.released);
        assert!(first.edges.case_edge);
        assert!(first.edges.file_edge);

        let once = queue_row(&client, &router, case_id).await.unwrap();

        let second = router
            .revoke(&mut client, doctor, patient, case_id)
            .await
            .unwrap();
        assert!(second.is_noop());

        let twice = queue_row(&client, &router, case_id).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            status(&client, &router, case_id).await,
            CaseStatus::Unclaimed
        );
    }

    #[tokio::test]
    async fn one_temp_claim_per_patient() {
        let t = at(2030, 4, 3, 9, 0);
        let clock = Clock::manual(t);
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let jurisdiction = jurisdiction(&mut client).await;
        let patient = id();
        let doctor = id();
        let first = queued_case(&mut client, &router, jurisdiction, patient).await;
        let second = queued_case(&mut client, &router, jurisdiction, patient).await;

        router
            .temp_claim(&mut client, doctor, first, FIFTEEN_MINUTES)
            .await
            .unwrap();

        clock.set(t + TimeDelta::minutes(5));
        let err = router
            .temp_claim(&mut client, doctor, second, FIFTEEN_MINUTES)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Claim(ClaimError::CaseClaimForbidden { .. })
        ));

        // The file edge still follows the first claim
        let file = file_edge(&client, &router, doctor, patient).await.unwrap();
        assert_eq!(file.expires_at, Some(t + TimeDelta::minutes(15)));
        assert!(case_edge(&client, &router, doctor, second).await.is_none());
        assert_eq!(
            status(&client, &router, second).await,
            CaseStatus::Unclaimed
        );

        // A revoke on a case the doctor does not hold leaves the live claim alone
        let revocation = router
            .revoke(&mut client, doctor, patient, second)
            .await
            .unwrap();
        assert!(revocation.is_noop());
        assert!(file_edge(&client, &router, doctor, patient)
            .await
            .unwrap()
            .is_temp());

        router
            .revoke(&mut client, doctor, patient, first)
            .await
            .unwrap();
        assert!(file_edge(&client, &router, doctor, patient).await.is_none());

        let claim = router
            .temp_claim(&mut client, doctor, second, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let expected = Some(t + TimeDelta::minutes(20));
        assert_eq!(Some(claim.expires_at), expected);
        assert_eq!(queue_row(&client, &router, second).await.unwrap().expires_at, expected);
        assert_eq!(
            case_edge(&client, &router, doctor, second).await.unwrap().expires_at,
            expected
        );
        assert_eq!(
            file_edge(&client, &router, doctor, patient).await.unwrap().expires_at,
            expected
        );
    }
}
