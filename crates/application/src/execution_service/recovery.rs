use super::*;

impl ExecutionService {
    /// Re-enqueues approved tickets whose event never left `pending`.
    ///
    /// Covers a crash between the approving commit and the enqueue call.
    /// Enqueue is idempotent per event, so live jobs are left alone.
    pub async fn recover_orphaned_approvals(
        &self,
        grace: Duration,
        limit: usize,
    ) -> AppResult<usize> {
        let orphans = self
            .tickets
            .list_orphaned_approvals(Utc::now() - grace, limit)
            .await?;

        let mut recovered = 0_usize;
        for orphan in orphans {
            match self.queue.enqueue(orphan.event_id, orphan.ticket_id).await {
                Ok(()) => recovered = recovered.saturating_add(1),
                Err(error) => warn!(
                    ticket_id = %orphan.ticket_id,
                    event_id = %orphan.event_id,
                    error = %error,
                    "failed to re-enqueue orphaned approval"
                ),
            }
        }

        if recovered > 0 {
            info!(recovered, "re-enqueued orphaned approvals");
        }

        Ok(recovered)
    }
}
