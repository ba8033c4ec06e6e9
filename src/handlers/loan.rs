//! Loan lifecycle API handlers

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::loan::{
    ApproveLoanInput, DisburseLoanInput, InvestLoanInput, InvestmentReceipt, Loan, LoanFilter,
    LoanInvestment, LoanService, ProposeLoanInput, ProposeLoanResponse,
};
use crate::models::ApiResponse;

type LoanPath = Result<Path<u64>, PathRejection>;

/// Body of `POST /api/loans/:loan_id/approve`
#[derive(Debug, Deserialize)]
pub struct ApproveLoanBody {
    pub employee_id: u64,
}

/// Body of `POST /api/loans/:loan_id/invest`
#[derive(Debug, Deserialize)]
pub struct InvestLoanBody {
    pub investor_id: u64,
    pub amount: Decimal,
}

pub async fn propose_loan(
    State(service): State<Arc<LoanService>>,
    payload: Result<Json<ProposeLoanInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ProposeLoanResponse>>)> {
    let Json(input) = payload?;
    let loan = service.propose(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ProposeLoanResponse {
            loan_id: loan.id,
            status: loan.status,
        })),
    ))
}

pub async fn approve_loan(
    State(service): State<Arc<LoanService>>,
    path: LoanPath,
    payload: Result<Json<ApproveLoanBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<Loan>>> {
    let Path(loan_id) = path?;
    let Json(body) = payload?;

    let loan = service
        .approve(ApproveLoanInput {
            loan_id,
            employee_id: body.employee_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(loan)))
}

pub async fn invest_loan(
    State(service): State<Arc<LoanService>>,
    path: LoanPath,
    payload: Result<Json<InvestLoanBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<InvestmentReceipt>>> {
    let Path(loan_id) = path?;
    let Json(body) = payload?;

    let receipt = service
        .invest(InvestLoanInput {
            loan_id,
            investor_id: body.investor_id,
            amount: body.amount,
        })
        .await?;

    Ok(Json(ApiResponse::success(receipt)))
}

pub async fn disburse_loan(
    State(service): State<Arc<LoanService>>,
    path: LoanPath,
) -> ApiResult<Json<ApiResponse<Loan>>> {
    let Path(loan_id) = path?;
    let loan = service.disburse(DisburseLoanInput { loan_id }).await?;

    Ok(Json(ApiResponse::success(loan)))
}

pub async fn get_loan(
    State(service): State<Arc<LoanService>>,
    path: LoanPath,
) -> ApiResult<Json<ApiResponse<Loan>>> {
    let Path(loan_id) = path?;
    let loan = service.get_loan(loan_id).await?;

    Ok(Json(ApiResponse::success(loan)))
}

/// `GET /api/loans?borrower_id=&status=`
pub async fn list_loans(
    State(service): State<Arc<LoanService>>,
    query: Result<Query<LoanFilter>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<Vec<Loan>>>> {
    let Query(filter) = query?;
    let loans = service.list_loans(filter).await?;

    Ok(Json(ApiResponse::success(loans)))
}

pub async fn list_loan_investments(
    State(service): State<Arc<LoanService>>,
    path: LoanPath,
) -> ApiResult<Json<ApiResponse<Vec<LoanInvestment>>>> {
    let Path(loan_id) = path?;
    let investments = service.list_investments(loan_id).await?;

    Ok(Json(ApiResponse::success(investments)))
}
