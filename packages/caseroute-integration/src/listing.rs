#[cfg(test)]
mod tests {
    use crate::common::{
        at, eligible, id, jurisdiction, minutes, queued_case, setup, FIFTEEN_MINUTES,
    };
    use caseroute::eligibility;
    use caseroute::error::{ClaimError, Error};
    use caseroute::Clock;

    #[tokio::test]
    async fn listing_across_jurisdictions() {
        let clock = Clock::manual(at(2030, 6, 1, 9, 0));
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let j7 = jurisdiction(&mut client).await;
        let j8 = jurisdiction(&mut client).await;
        let (d11, d12) = (id(), id());

        eligible(&mut client, &router, d11, j7).await;
        eligible(&mut client, &router, d11, j8).await;
        eligible(&mut client, &router, d12, j8).await;

        let case_300 = queued_case(&mut client, &router, j7, id()).await;
        clock.advance(minutes(1));
        let case_301 = queued_case(&mut client, &router, j8, id()).await;

        router
            .temp_claim(&mut client, d11, case_301, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let listed = router
            .list_eligible_for(&client, d11)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.case_id)
            .collect::<Vec<_>>();
        assert_eq!(listed, vec![case_300, case_301]);

        let listed = router.list_eligible_for(&client, d12).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn doctor_without_jurisdiction() {
        let Some((client, router)) = setup(Clock::manual(at(2030, 6, 2, 9, 0))).await else {
            return;
        };

        let doctor = id();
        let err = router.list_eligible_for(&client, doctor).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Claim(ClaimError::NotEligibleAnywhere { doctor_id }) if doctor_id == doctor
        ));
    }

    #[tokio::test]
    async fn listing_is_ordered_and_filtered() {
        let clock = Clock::manual(at(2030, 6, 3, 9, 0));
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let served = jurisdiction(&mut client).await;
        let elsewhere = jurisdiction(&mut client).await;
        let (doctor, other) = (id(), id());

        eligible(&mut client, &router, doctor, served).await;
        eligible(&mut client, &router, other, elsewhere).await;

        let mut expected = Vec::new();
        for n in 0..6 {
            let jurisdiction_id = if n % 2 == 0 { served } else { elsewhere };
            let case_id = queued_case(&mut client, &router, jurisdiction_id, id()).await;
            if jurisdiction_id == served {
                expected.push(case_id);
            }
            clock.advance(minutes(1));
        }

        // Held by the doctor: listed for them, hidden from everyone else
        let held = queued_case(&mut client, &router, served, id()).await;
        router
            .temp_claim(&mut client, doctor, held, FIFTEEN_MINUTES)
            .await
            .unwrap();
        expected.push(held);

        // Held elsewhere by the doctor: out of their jurisdictions, never listed
        let stray = queued_case(&mut client, &router, elsewhere, id()).await;
        router
            .temp_claim(&mut client, doctor, stray, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let listed = router.list_eligible_for(&client, doctor).await.unwrap();
        let jurisdictions = eligibility::jurisdictions_for((&client).into(), router.roles(), doctor)
            .await
            .unwrap();

        for entry in &listed {
            assert!(jurisdictions.contains(&entry.jurisdiction_id));
            assert!(!entry.locked || entry.is_held_by(doctor));
        }

        assert!(listed
            .windows(2)
            .all(|pair| pair[0].enqueued_at <= pair[1].enqueued_at));

        let listed = listed.iter().map(|entry| entry.case_id).collect::<Vec<_>>();
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn operational_views() {
        let clock = Clock::manual(at(2030, 6, 4, 9, 0));
        let Some((mut client, router)) = setup(clock.clone()).await else {
            return;
        };

        let j1 = jurisdiction(&mut client).await;
        let j2 = jurisdiction(&mut client).await;
        let doctor = id();

        queued_case(&mut client, &router, j1, id()).await;
        let held = queued_case(&mut client, &router, j2, id()).await;

        router
            .temp_claim(&mut client, doctor, held, FIFTEEN_MINUTES)
            .await
            .unwrap();

        let unclaimed = router.jurisdictions_with_unclaimed(&client).await.unwrap();
        assert!(unclaimed.contains(&j1));
        assert!(!unclaimed.contains(&j2));

        let claimed = router.list_claimed(&client).await.unwrap();
        assert!(claimed
            .iter()
            .any(|entry| entry.case_id == held && entry.is_held_by(doctor)));
        assert!(claimed.iter().all(|entry| entry.locked));

        assert!(router
            .temp_claimed_entry(&client, held, id())
            .await
            .unwrap()
            .is_none());

        clock.advance(minutes(5));
        let oldest = router.oldest(&client, 3).await.unwrap();
        assert!(!oldest.is_empty() && oldest.len() <= 3);
        assert!(oldest.windows(2).all(|pair| pair[0].age >= pair[1].age));

        // A case a doctor is working on is not starving
        let oldest = router.oldest(&client, usize::MAX).await.unwrap();
        assert!(oldest.iter().all(|item| !item.locked));
        assert!(oldest.iter().all(|item| item.case_id != held));
    }
}
