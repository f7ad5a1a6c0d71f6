mod ledger;
mod retry;
