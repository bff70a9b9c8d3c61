use std::sync::Arc;

use shared::{
    domain::{RequestId, RequestStatus},
    protocol::{EditRequest, PageTextUpdate, RequestUpdate},
};
use tracing::{info, warn};

use super::{diff::DiffView, ReviewClient, ReviewError};

pub const NOTICE_FAILED: &str = "Failed to update request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardTab {
    #[default]
    Pending,
    Accepted,
    Rejected,
    All,
}

impl BoardTab {
    pub const ALL: [BoardTab; 4] = [
        BoardTab::Pending,
        BoardTab::Accepted,
        BoardTab::Rejected,
        BoardTab::All,
    ];

    pub fn title(self) -> &'static str {
        match self {
            BoardTab::Pending => "Pending",
            BoardTab::Accepted => "Accepted",
            BoardTab::Rejected => "Rejected",
            BoardTab::All => "All",
        }
    }

    pub fn matches(self, status: RequestStatus) -> bool {
        match self {
            BoardTab::Pending => status == RequestStatus::Pending,
            BoardTab::Accepted => status == RequestStatus::Accepted,
            BoardTab::Rejected => status == RequestStatus::Rejected,
            BoardTab::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    fn status(self) -> RequestStatus {
        match self {
            ReviewAction::Approve => RequestStatus::Accepted,
            ReviewAction::Reject => RequestStatus::Rejected,
        }
    }

    fn done_notice(self) -> &'static str {
        match self {
            ReviewAction::Approve => "Request approved successfully",
            ReviewAction::Reject => "Request rejected successfully",
        }
    }
}

/// The request open for review and the reviewer's edited proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    pub request: RequestId,
    pub new_text: String,
}

/// An approve or reject waiting for its notes and confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub request: RequestId,
    pub action: ReviewAction,
    pub notes: String,
}

pub struct ReviewBoard {
    client: Arc<dyn ReviewClient>,
    requests: Vec<EditRequest>,
    tab: BoardTab,
    draft: Option<ReviewDraft>,
    action: Option<PendingAction>,
    notice: Option<String>,
}

impl ReviewBoard {
    pub fn new(client: Arc<dyn ReviewClient>) -> Self {
        Self {
            client,
            requests: Vec::new(),
            tab: BoardTab::default(),
            draft: None,
            action: None,
            notice: None,
        }
    }

    pub async fn refresh(&mut self) -> Result<usize, ReviewError> {
        self.requests = self.client.list_requests().await?;
        Ok(self.requests.len())
    }

    pub fn requests(&self) -> &[EditRequest] {
        &self.requests
    }

    pub fn tab(&self) -> BoardTab {
        self.tab
    }

    pub fn set_tab(&mut self, tab: BoardTab) {
        self.tab = tab;
    }

    pub fn visible(&self) -> impl Iterator<Item = &EditRequest> {
        let tab = self.tab;
        self.requests.iter().filter(move |req| tab.matches(req.status))
    }

    pub fn count(&self, tab: BoardTab) -> usize {
        self.requests.iter().filter(|req| tab.matches(req.status)).count()
    }

    /// `"Pending (3)"`.
    pub fn tab_label(&self, tab: BoardTab) -> String {
        format!("{} ({})", tab.title(), self.count(tab))
    }

    pub fn find(&self, id: &RequestId) -> Option<&EditRequest> {
        self.requests.iter().find(|req| &req.id == id)
    }

    /// Opens the review view with the proposal as the starting draft.
    pub fn open_review(&mut self, id: &RequestId) -> Result<&ReviewDraft, ReviewError> {
        let request = self
            .find(id)
            .ok_or_else(|| ReviewError::UnknownRequest(id.clone()))?;
        let draft = ReviewDraft {
            request: request.id.clone(),
            new_text: request.new_text.clone(),
        };
        Ok(self.draft.insert(draft))
    }

    pub fn draft(&self) -> Option<&ReviewDraft> {
        self.draft.as_ref()
    }

    pub fn edit_draft(&mut self, text: impl Into<String>) -> Result<(), ReviewError> {
        let draft = self.draft.as_mut().ok_or(ReviewError::NoSelection)?;
        draft.new_text = text.into();
        Ok(())
    }

    /// Current text against the draft when one is open, else against the proposal.
    pub fn diff(&self, id: &RequestId) -> Result<DiffView, ReviewError> {
        let request = self
            .find(id)
            .ok_or_else(|| ReviewError::UnknownRequest(id.clone()))?;
        let proposed = match &self.draft {
            Some(draft) if &draft.request == id => draft.new_text.as_str(),
            _ => request.new_text.as_str(),
        };
        Ok(DiffView::new(&request.old_text, proposed))
    }

    pub fn close_review(&mut self) {
        self.draft = None;
    }

    pub fn begin_action(&mut self, id: &RequestId, action: ReviewAction) -> Result<(), ReviewError> {
        let request = self
            .find(id)
            .ok_or_else(|| ReviewError::UnknownRequest(id.clone()))?;
        if request.status != RequestStatus::Pending {
            return Err(ReviewError::NotPending(id.clone()));
        }
        self.action = Some(PendingAction {
            request: id.clone(),
            action,
            notes: String::new(),
        });
        Ok(())
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.action.as_ref()
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) -> Result<(), ReviewError> {
        let action = self.action.as_mut().ok_or(ReviewError::NoSelection)?;
        action.notes = notes.into();
        Ok(())
    }

    pub fn cancel_action(&mut self) {
        self.action = None;
    }

    /// Sends the pending action. Approval also writes the draft (or the
    /// untouched proposal) into the page. The review and action both close
    /// whatever the outcome.
    pub async fn confirm(&mut self) -> Result<EditRequest, ReviewError> {
        let action = self.action.take().ok_or(ReviewError::NoSelection)?;
        let draft = self.draft.take();
        let result = self.apply(&action, draft).await;
        match &result {
            Ok(updated) => {
                info!(request_id = %updated.id, status = %updated.status, "edit request reviewed");
                self.notice = Some(action.action.done_notice().to_string());
            }
            Err(err) => {
                warn!(request_id = %action.request, error = %err, "edit request review failed");
                self.notice = Some(NOTICE_FAILED.to_string());
            }
        }
        result
    }

    async fn apply(
        &mut self,
        action: &PendingAction,
        draft: Option<ReviewDraft>,
    ) -> Result<EditRequest, ReviewError> {
        let request = self
            .find(&action.request)
            .cloned()
            .ok_or_else(|| ReviewError::UnknownRequest(action.request.clone()))?;
        if request.status != RequestStatus::Pending {
            return Err(ReviewError::NotPending(request.id));
        }

        let approved_text = match (action.action, draft) {
            (ReviewAction::Approve, Some(draft)) if draft.request == request.id => draft.new_text,
            (ReviewAction::Approve, _) => request.new_text.clone(),
            (ReviewAction::Reject, _) => String::new(),
        };
        let update = RequestUpdate {
            status: Some(action.action.status()),
            review: Some(action.notes.clone()),
            new_text: (action.action == ReviewAction::Approve && approved_text != request.new_text)
                .then(|| approved_text.clone()),
        };
        let updated = self.client.update_request(&request.id, &update).await?;

        if action.action == ReviewAction::Approve && !approved_text.is_empty() {
            self.client
                .update_page_text(
                    &request.page_id,
                    &PageTextUpdate {
                        request_type: request.request_type,
                        new_text: approved_text,
                    },
                )
                .await?;
        }

        if let Some(row) = self.requests.iter_mut().find(|req| req.id == updated.id) {
            *row = updated.clone();
        }
        Ok(updated)
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }
}

#[cfg(test)]
#[path = "../tests/review_board_tests.rs"]
mod tests;
